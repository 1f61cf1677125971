//! Runs the samples on one engine
//!
//! Each sample unit is added the first time it is needed and reused after
//! that, the same way a host program keeps one engine for its lifetime.

use std::cell::RefCell;
use std::collections::HashSet;

use core_types::SymbolFlags;
use jit_compiler::{EngineConfig, JitEngine};
use jit_ir::CompilationUnit;
use tracing::debug;

use crate::error::{CliError, CliResult};
use crate::samples::{self, Point};

thread_local! {
    static PRINTED: RefCell<Vec<i32>> = const { RefCell::new(Vec::new()) };
}

/// Host callback the coroutine calls as `print(i32)`
extern "C" fn host_print(value: i32) {
    println!("{}", value);
    PRINTED.with(|p| p.borrow_mut().push(value));
}

type Handle = *mut u8;

/// What the coroutine did while being driven to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoroutineTrace {
    /// Values passed to `print`, in order
    pub printed: Vec<i32>,
    /// `coro_done` results, one per poll
    pub done: Vec<bool>,
    /// Number of `coro_resume` calls
    pub resumes: usize,
}

/// Owns an engine and the sample units added to it.
pub struct Runner {
    engine: JitEngine,
    loaded: HashSet<&'static str>,
    sum_array_len: Option<u32>,
}

impl Runner {
    /// Create an engine for the host
    pub fn new(config: EngineConfig) -> CliResult<Self> {
        let engine = JitEngine::builder().config(config).build()?;
        Ok(Self {
            engine,
            loaded: HashSet::new(),
            sum_array_len: None,
        })
    }

    /// The underlying engine
    pub fn engine(&self) -> &JitEngine {
        &self.engine
    }

    fn load(&mut self, key: &'static str, unit: impl FnOnce(&JitEngine) -> CompilationUnit) -> CliResult<()> {
        if self.loaded.contains(key) {
            return Ok(());
        }
        let unit = unit(&self.engine);
        CliError::verify(unit.name(), unit.verify())?;
        self.engine.add_module(unit)?;
        self.loaded.insert(key);
        debug!(sample = key, "sample unit added");
        Ok(())
    }

    /// `x * y + z` through JIT code
    pub fn mul_add(&mut self, x: i32, y: i32, z: i32) -> CliResult<i32> {
        self.load("mul_add", |e| samples::mul_add_unit(e.context()))?;
        // SAFETY: mul_add is (i32, i32, i32) -> i32.
        let f = unsafe {
            self.engine
                .get_function::<extern "C" fn(i32, i32, i32) -> i32>("mul_add")?
        };
        Ok(f(x, y, z))
    }

    /// Sum of the x coordinates of `points` through JIT code
    pub fn sum_array(&mut self, points: &[Point]) -> CliResult<i32> {
        let len = u32::try_from(points.len())
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| CliError::Usage(format!("cannot sum {} points", points.len())))?;
        match self.sum_array_len {
            Some(loaded) if loaded != len => {
                return Err(CliError::Usage(format!(
                    "sum_array was compiled for {} points, got {}",
                    loaded,
                    len
                )))
            }
            _ => {}
        }
        self.load("sum_array", |e| samples::sum_array_unit(e.context(), len))?;
        self.sum_array_len = Some(len);

        // SAFETY: sum_array is (ptr) -> i32 and reads `len` packed points.
        let f = unsafe {
            self.engine
                .get_function::<extern "C" fn(*const Point) -> i32>("sum_array")?
        };
        Ok(f(points.as_ptr()))
    }

    /// Start the coroutine at `n`, resume it until done, then destroy it
    pub fn coro(&mut self, n: i32) -> CliResult<CoroutineTrace> {
        if !self.loaded.contains("coro") {
            self.engine
                .define_absolute("print", host_print as usize as u64, SymbolFlags::EXPORTED | SymbolFlags::CALLABLE)?;
        }
        self.load("coro", |e| samples::coro_unit(e.context()))?;

        // SAFETY: signatures match the functions built by `samples::coro_unit`.
        let (coro_inc, coro_resume, coro_destroy, coro_done) = unsafe {
            (
                self.engine.get_function::<extern "C" fn(i32) -> Handle>("coro_inc")?,
                self.engine.get_function::<extern "C" fn(Handle)>("coro_resume")?,
                self.engine.get_function::<extern "C" fn(Handle)>("coro_destroy")?,
                self.engine.get_function::<extern "C" fn(Handle) -> bool>("coro_done")?,
            )
        };

        PRINTED.with(|p| p.borrow_mut().clear());
        let mut trace = CoroutineTrace::default();

        let hdl = coro_inc(n);
        loop {
            let done = coro_done(hdl);
            trace.done.push(done);
            if done {
                break;
            }
            coro_resume(hdl);
            trace.resumes += 1;
        }
        coro_destroy(hdl);

        trace.printed = PRINTED.with(|p| std::mem::take(&mut *p.borrow_mut()));
        Ok(trace)
    }

    /// Host target description
    pub fn layout(&self) -> String {
        format!(
            "triple: {}\ndata layout: {}",
            self.engine.target().triple,
            self.engine.data_layout()
        )
    }
}

/// Points from `x0 y0 x1 y1 ...`; the default points when empty
pub fn points_from(values: &[i32]) -> CliResult<Vec<Point>> {
    if values.is_empty() {
        return Ok(samples::DEFAULT_POINTS.to_vec());
    }
    if values.len() % 2 != 0 {
        return Err(CliError::Usage(format!(
            "expected x/y pairs, got {} values",
            values.len()
        )));
    }
    Ok(values
        .chunks(2)
        .map(|pair| Point {
            x: pair[0],
            y: pair[1],
        })
        .collect())
}
