//! Unit tests for DataLayout and TargetDescription

use core_types::{DataLayout, Endianness, JitError, Mangling, TargetDescription, Triple};

#[cfg(test)]
mod data_layout_tests {
    use super::*;

    #[test]
    fn test_empty_string_is_generic() {
        let layout: DataLayout = "".parse().unwrap();
        assert_eq!(layout, DataLayout::generic());
    }

    #[test]
    fn test_pointer_without_alignment() {
        let layout: DataLayout = "e-p:32".parse().unwrap();
        assert_eq!(layout.pointer_bits, 32);
        assert_eq!(layout.pointer_align_bits, 32);
        assert_eq!(layout.pointer_bytes(), 4);
    }

    #[test]
    fn test_layouts_compare_by_value() {
        let a: DataLayout = "e-m:e-p:64:64-i64:64-S128".parse().unwrap();
        let b: DataLayout = "e-m:e-p:64:64-i64:64-S128".parse().unwrap();
        let c: DataLayout = "E-m:e-p:64:64-i64:64-S128".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unknown_mangling_rejected() {
        assert!("m:x".parse::<DataLayout>().is_err());
    }

    #[test]
    fn test_aarch64_macos_layout() {
        let triple: Triple = "aarch64-apple-darwin".parse().unwrap();
        let layout = DataLayout::for_triple(&triple).unwrap();
        assert_eq!(layout.mangling, Mangling::MachO);
        assert_eq!(layout.global_prefix(), Some('_'));
    }

    #[test]
    fn test_s390x_is_big_endian() {
        let triple: Triple = "s390x-unknown-linux-gnu".parse().unwrap();
        let layout = DataLayout::for_triple(&triple).unwrap();
        assert_eq!(layout.endianness, Endianness::Big);
        assert_eq!(layout.stack_align_bits, 64);
    }
}

#[cfg(test)]
mod target_description_tests {
    use super::*;

    #[test]
    fn test_detect_host() {
        let target = TargetDescription::detect_host().unwrap();
        assert_eq!(target.data_layout.pointer_bits, 64);
    }

    #[test]
    fn test_unknown_architecture_fails() {
        let triple: Triple = "unknown-unknown-unknown".parse().unwrap();
        let err = TargetDescription::from_triple(triple).unwrap_err();
        assert!(matches!(err, JitError::TargetDetection(_)));
    }

    #[test]
    fn test_display_mentions_layout() {
        let triple: Triple = "x86_64-unknown-linux-gnu".parse().unwrap();
        let target = TargetDescription::from_triple(triple).unwrap();
        assert_eq!(
            target.to_string(),
            "x86_64-unknown-linux-gnu (e-m:e-p:64:64-i64:64-S128)"
        );
    }
}
