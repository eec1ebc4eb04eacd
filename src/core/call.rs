//! §4.H Call machinery.
//!
//! A call frame records enough to format a stack trace (filename,
//! function name, source position) and is pushed/popped around every
//! invocation, mirroring the distilled original's `call_frame_t`/
//! `call_stack_t`. `Function.prototype.bind` partially applies `this`
//! and a prefix of arguments without re-entering the evaluator.

use crate::core::value::Value;
use crate::error::CallFrame;

pub const MAX_CALL_DEPTH: usize = 2048;

#[derive(Default)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    pub fn push(&mut self, filename: &str, function_name: &str, line: usize, column: usize) -> Result<(), crate::error::JSError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(crate::error::JSError::StackOverflow { message: "maximum call stack size exceeded".into() });
        }
        self.frames.push(CallFrame { filename: filename.to_string(), function_name: function_name.to_string(), line, column });
        Ok(())
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn snapshot(&self) -> Vec<CallFrame> {
        self.frames.iter().rev().cloned().collect()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Arguments bound ahead of a call via `Function.prototype.bind`, applied
/// as a prefix to whatever arguments the eventual call supplies.
pub struct BoundCall {
    pub target: Value,
    pub bound_this: Value,
    pub bound_args: Vec<Value>,
}

impl BoundCall {
    pub fn full_arguments(&self, call_site_args: &[Value]) -> Vec<Value> {
        let mut all = self.bound_args.clone();
        all.extend_from_slice(call_site_args);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_stack_overflow_is_reported_as_range_like_error() {
        let mut stack = CallStack::default();
        for _ in 0..MAX_CALL_DEPTH {
            stack.push("f.js", "f", 1, 1).unwrap();
        }
        assert!(stack.push("f.js", "f", 1, 1).is_err());
    }

    #[test]
    fn bound_arguments_prefix_call_site_arguments() {
        let bound = BoundCall { target: Value::UNDEFINED, bound_this: Value::UNDEFINED, bound_args: vec![Value::number(1.0), Value::number(2.0)] };
        let full = bound.full_arguments(&[Value::number(3.0)]);
        assert_eq!(full, vec![Value::number(1.0), Value::number(2.0), Value::number(3.0)]);
    }
}
