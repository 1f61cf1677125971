//! Data layout descriptors and host target description.
//!
//! A [`DataLayout`] fixes pointer width, endianness, alignment rules and the
//! symbol-prefix convention. The engine picks one at construction time from
//! the host [`TargetDescription`] and every compilation unit must agree with it.

use std::fmt;
use std::str::FromStr;

use target_lexicon::{Architecture, BinaryFormat, Triple};

use crate::error::{JitError, JitResult};

/// Byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Symbol mangling convention of the object format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mangling {
    /// No mangling information
    None,
    /// ELF: private symbols get a `.L` prefix, globals are unprefixed
    Elf,
    /// Mach-O: globals are prefixed with `_`
    MachO,
    /// Windows COFF
    WinCoff,
}

impl Mangling {
    fn code(self) -> Option<char> {
        match self {
            Mangling::None => None,
            Mangling::Elf => Some('e'),
            Mangling::MachO => Some('o'),
            Mangling::WinCoff => Some('w'),
        }
    }
}

/// Data layout of a compilation unit or engine.
///
/// The textual form uses `-`-separated components:
/// `e`/`E` (endianness), `m:<e|o|w>` (mangling), `p:<size>:<align>`
/// (pointers), `i64:<align>` and `S<align>` (stack alignment). All sizes and
/// alignments are in bits.
///
/// # Examples
///
/// ```
/// use core_types::DataLayout;
///
/// let layout: DataLayout = "e-m:e-p:64:64-i64:64-S128".parse().unwrap();
/// assert_eq!(layout.pointer_bytes(), 8);
/// assert_eq!(layout.to_string(), "e-m:e-p:64:64-i64:64-S128");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataLayout {
    /// Byte order
    pub endianness: Endianness,
    /// Symbol mangling mode
    pub mangling: Mangling,
    /// Pointer size in bits
    pub pointer_bits: u32,
    /// Pointer ABI alignment in bits
    pub pointer_align_bits: u32,
    /// ABI alignment of `i64` in bits
    pub i64_align_bits: u32,
    /// Natural stack alignment in bits (0 = unspecified)
    pub stack_align_bits: u32,
}

impl DataLayout {
    /// Generic layout with no target-specific information
    pub const fn generic() -> Self {
        Self {
            endianness: Endianness::Little,
            mangling: Mangling::None,
            pointer_bits: 64,
            pointer_align_bits: 64,
            i64_align_bits: 32,
            stack_align_bits: 0,
        }
    }

    /// Default layout for a target triple
    pub fn for_triple(triple: &Triple) -> JitResult<Self> {
        let mangling = match triple.binary_format {
            BinaryFormat::Elf => Mangling::Elf,
            BinaryFormat::Macho => Mangling::MachO,
            BinaryFormat::Coff => Mangling::WinCoff,
            other => {
                return Err(JitError::TargetDetection(format!(
                    "unsupported object format '{}' for {}",
                    other, triple
                )))
            }
        };

        let (endianness, stack_align_bits) = match triple.architecture {
            Architecture::X86_64 | Architecture::Aarch64(_) | Architecture::Riscv64(_) => {
                (Endianness::Little, 128)
            }
            Architecture::S390x => (Endianness::Big, 64),
            other => {
                return Err(JitError::TargetDetection(format!(
                    "no default data layout for architecture '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            endianness,
            mangling,
            pointer_bits: 64,
            pointer_align_bits: 64,
            i64_align_bits: 64,
            stack_align_bits,
        })
    }

    /// Pointer size in bytes
    pub fn pointer_bytes(&self) -> u32 {
        self.pointer_bits / 8
    }

    /// Pointer ABI alignment in bytes
    pub fn pointer_align(&self) -> u32 {
        self.pointer_align_bits / 8
    }

    /// ABI alignment of `i64` in bytes
    pub fn i64_align(&self) -> u32 {
        self.i64_align_bits / 8
    }

    /// Character prepended to global symbol names, if any
    pub fn global_prefix(&self) -> Option<char> {
        match self.mangling {
            Mangling::MachO => Some('_'),
            _ => None,
        }
    }

    fn parse_bits(component: &str, value: &str) -> Result<u32, String> {
        value
            .parse::<u32>()
            .map_err(|_| format!("invalid size in '{}'", component))
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::generic()
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.endianness {
            Endianness::Little => write!(f, "e")?,
            Endianness::Big => write!(f, "E")?,
        }
        if let Some(code) = self.mangling.code() {
            write!(f, "-m:{}", code)?;
        }
        write!(f, "-p:{}:{}", self.pointer_bits, self.pointer_align_bits)?;
        write!(f, "-i64:{}", self.i64_align_bits)?;
        if self.stack_align_bits != 0 {
            write!(f, "-S{}", self.stack_align_bits)?;
        }
        Ok(())
    }
}

impl FromStr for DataLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut layout = DataLayout::generic();
        if s.is_empty() {
            return Ok(layout);
        }

        for component in s.split('-') {
            let parts: Vec<&str> = component.split(':').collect();
            match parts.as_slice() {
                ["e"] => layout.endianness = Endianness::Little,
                ["E"] => layout.endianness = Endianness::Big,
                ["m", mode] => {
                    layout.mangling = match *mode {
                        "e" => Mangling::Elf,
                        "o" => Mangling::MachO,
                        "w" => Mangling::WinCoff,
                        _ => return Err(format!("unknown mangling mode '{}'", mode)),
                    }
                }
                ["p", size] => {
                    layout.pointer_bits = Self::parse_bits(component, size)?;
                    layout.pointer_align_bits = layout.pointer_bits;
                }
                ["p", size, align] => {
                    layout.pointer_bits = Self::parse_bits(component, size)?;
                    layout.pointer_align_bits = Self::parse_bits(component, align)?;
                }
                ["i64", align] => layout.i64_align_bits = Self::parse_bits(component, align)?,
                [stack] if stack.starts_with('S') => {
                    layout.stack_align_bits = Self::parse_bits(component, &stack[1..])?;
                }
                _ => return Err(format!("unrecognized layout component '{}'", component)),
            }
        }

        if layout.pointer_bits == 0 || layout.pointer_bits % 8 != 0 {
            return Err(format!("invalid pointer size {}", layout.pointer_bits));
        }
        Ok(layout)
    }
}

/// Host target: triple plus the data layout derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescription {
    /// Instruction set / OS / ABI triple
    pub triple: Triple,
    /// Default data layout for the triple
    pub data_layout: DataLayout,
}

impl TargetDescription {
    /// Describe the machine this process runs on
    pub fn detect_host() -> JitResult<Self> {
        Self::from_triple(Triple::host())
    }

    /// Describe an arbitrary triple
    pub fn from_triple(triple: Triple) -> JitResult<Self> {
        if triple.architecture == Architecture::Unknown {
            return Err(JitError::TargetDetection(
                "host architecture is unknown".to_string(),
            ));
        }
        let data_layout = DataLayout::for_triple(&triple)?;
        Ok(Self {
            triple,
            data_layout,
        })
    }
}

impl fmt::Display for TargetDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.triple, self.data_layout)
    }
}
