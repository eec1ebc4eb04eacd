//! The engine core: NaN-boxed values, the arena allocator and its
//! compacting GC, the heap's object/function/error/promise side tables,
//! the lexer/parser/AST, the scope chain, and the tree-walking
//! evaluator. Everything outside `core` (promises, coroutines, the
//! event loop, builtins) is built on top of this module's public API.

pub mod arena;
pub mod ast;
pub mod call;
pub mod eval;
pub mod gc;
pub mod heap;
pub mod object;
pub mod parser;
pub mod rope;
pub mod scope;
pub mod token;
pub mod value;

pub use ast::Program;
pub use call::{CallStack, MAX_CALL_DEPTH};
pub use eval::{EvalResult, Evaluator, NativeFn, Signal};
pub use gc::{GcScheduler, GcStats};
pub use heap::{FunctionData, Heap, HeapNode, PromiseData, PromiseState, TypedArrayData, TypedArrayKind};
pub use object::{InternalSlot, ObjectData, PropKey};
pub use parser::Parser;
pub use scope::{BindingKind, ScopeHandle, ScopeKind};
pub use value::{Tag, Value};
