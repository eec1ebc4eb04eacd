#![doc = include_str!("../README.md")]

pub mod core;
pub mod error;

pub mod coroutine;
pub mod diagnostics;
pub mod embedder;
pub mod event_loop;
pub mod js_array;
pub mod js_bigint;
pub mod js_object;
pub mod js_promise;
pub mod js_string;
pub mod js_typedarray;
pub mod unicode;

pub use core::{Evaluator, Heap, Tag, Value};
pub use embedder::{MemoryConfig, Runtime};
pub use error::{JSError, JSErrorKind};
pub use event_loop::EventLoop;
