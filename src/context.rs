//! Interpreter instance
//!
//! A [`Context`] owns everything one script environment needs: the arena,
//! the lexer, the current scope, the native function table and the error
//! channel. All of its persistent state lives inside the arena buffer, so
//! the host controls the memory ceiling exactly.

use std::error::Error;
use std::fmt;

use crate::gc::{Arena, GcStats, collect};
use crate::parser::Lexer;
use crate::value::{Offset, Type, Value};

/// Execution flags, held on the context for the duration of one `eval`.
pub(crate) const F_NOEXEC: u8 = 1; // parse without evaluating
pub(crate) const F_LOOP: u8 = 2; // inside a breakable construct
pub(crate) const F_CALL: u8 = 4; // inside a function call
pub(crate) const F_BREAK: u8 = 8; // break executed, skip to loop end
pub(crate) const F_RETURN: u8 = 16; // return executed, skip to call end

/// Fixed-size error message buffer, NUL-padded.
const ERRMSG_SIZE: usize = 36;

/// Smallest buffer that can hold the root scope object.
const MIN_BUFFER: usize = 8;

/// Offsets carry their entity tag in the low bits and the reclaimer mark
/// in bit 31, and a String header stores its length shifted two bits left
/// below that mark, so the buffer must stay below 2^29 bytes.
const MAX_BUFFER: usize = 1 << 29;

/// A host function callable from scripts. Arguments arrive evaluated and
/// dereferenced; the return value becomes the call expression's result.
pub type NativeFn = fn(&mut Context, &[Value]) -> Value;

/// Why a buffer was rejected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    /// The buffer cannot hold even the root scope object.
    TooSmall,
    /// The buffer exceeds the addressable range of entity headers.
    TooLarge,
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::TooSmall => write!(f, "buffer too small for interpreter state"),
            CreateError::TooLarge => write!(f, "buffer exceeds addressable range"),
        }
    }
}

impl Error for CreateError {}

/// One interpreter instance over one fixed-size buffer.
pub struct Context {
    pub(crate) arena: Arena,
    pub(crate) lexer: Lexer,
    /// Current scope object, always `Type::Object`.
    pub(crate) scope: Value,
    pub(crate) flags: u8,
    /// Current expression/block nesting depth, against `max_depth`.
    pub(crate) depth: u16,
    max_depth: u16,
    /// Offsets kept alive across reclamation while calls are in flight.
    pub(crate) pins: Vec<Offset>,
    /// An `eval` is running; reclamation requests are deferred until it
    /// reaches a statement boundary.
    busy: bool,
    gc_requested: bool,
    /// Owner object of the most recently resolved lvalue. Captured when an
    /// identifier or member is parsed, consumed by assignment.
    pub(crate) lvalue_owner: Offset,
    errmsg: [u8; ERRMSG_SIZE],
    pub(crate) natives: Vec<NativeFn>,
}

impl Context {
    /// Create an interpreter backed by a fresh buffer of `size` bytes.
    pub fn new(size: usize) -> Result<Context, CreateError> {
        Context::from_buffer(vec![0; size]).map_err(|(e, _)| e)
    }

    /// Create an interpreter inside a caller-supplied buffer. On rejection
    /// the buffer is handed back untouched.
    pub fn from_buffer(buf: Vec<u8>) -> Result<Context, (CreateError, Vec<u8>)> {
        if buf.len() < MIN_BUFFER {
            return Err((CreateError::TooSmall, buf));
        }
        if buf.len() >= MAX_BUFFER {
            return Err((CreateError::TooLarge, buf));
        }
        let mut arena = Arena::from_buffer(buf);
        // Guaranteed by the size check above.
        let root = arena.create_object(0).unwrap_or(0);
        debug_assert_eq!(root, 0);
        Ok(Context {
            arena,
            lexer: Lexer::new(b""),
            scope: Value::new(Type::Object, 0),
            flags: 0,
            depth: 0,
            max_depth: 200,
            pins: Vec::new(),
            busy: false,
            gc_requested: false,
            lvalue_owner: 0,
            errmsg: [0; ERRMSG_SIZE],
            natives: Vec::new(),
        })
    }

    /// Evaluate a script and return the value of its last statement.
    ///
    /// On failure the returned value satisfies [`Value::is_err`] and
    /// [`Context::error_message`] describes the problem. The global scope
    /// persists across calls, so `eval` can be used as a REPL step.
    pub fn eval(&mut self, code: &str) -> Value {
        self.lexer.reset(code.as_bytes());
        self.flags = 0;
        self.depth = 0;
        self.lvalue_owner = 0;
        self.errmsg[0] = 0;
        let prev = std::mem::replace(&mut self.busy, true);
        let res = self.run_statements();
        self.busy = prev;
        res
    }

    /// Expose a host function to scripts under `name` in the global scope.
    pub fn register(&mut self, name: &str, f: NativeFn) -> Result<(), CreateError> {
        let idx = self.natives.len() as u32;
        if self
            .arena
            .set_property(0, name.as_bytes(), Value::native_function(idx))
            .is_none()
        {
            return Err(CreateError::TooSmall);
        }
        self.natives.push(f);
        Ok(())
    }

    /// Raise a language-level error: record the message, abandon the rest
    /// of the token stream and return the error value.
    pub fn throw(&mut self, msg: &str) -> Value {
        let mut out = Vec::with_capacity(ERRMSG_SIZE);
        out.extend_from_slice(b"ERROR: ");
        out.extend_from_slice(msg.as_bytes());
        out.truncate(ERRMSG_SIZE - 1);
        // Don't split a UTF-8 sequence at the truncation point.
        while !out.is_empty() && std::str::from_utf8(&out).is_err() {
            out.pop();
        }
        self.errmsg = [0; ERRMSG_SIZE];
        self.errmsg[..out.len()].copy_from_slice(&out);
        self.lexer.skip_to_end();
        Value::ERROR
    }

    /// Message of the most recent error, or "" if none was raised.
    pub fn error_message(&self) -> &str {
        let len = self
            .errmsg
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ERRMSG_SIZE);
        std::str::from_utf8(&self.errmsg[..len]).unwrap_or("")
    }

    /// Cap on expression/block nesting depth (default 200).
    pub fn set_max_depth(&mut self, depth: u16) {
        self.max_depth = depth;
    }

    /// Bytes in use and total capacity of the arena.
    pub fn memory_usage(&self) -> (u32, u32) {
        (self.arena.brk(), self.arena.capacity())
    }

    /// Reclaim unreachable entities now.
    ///
    /// While an evaluation is in flight (a native function calling back
    /// into its `Context`), the evaluator holds values of partly-executed
    /// expressions that are not rooted, so the request is recorded instead
    /// and runs at the next statement boundary; the returned stats are
    /// then all zero.
    pub fn gc(&mut self) -> GcStats {
        if self.busy {
            self.gc_requested = true;
            return GcStats::default();
        }
        self.gc_requested = false;
        let mut scope = self.scope;
        let stats = collect(&mut self.arena, &mut [&mut scope], &mut self.pins);
        self.scope = scope;
        stats
    }

    /// Reclaim between top-level statements once the arena is more than
    /// half full, or when a deferred request is pending. Never runs inside
    /// a call, where unrooted temporaries (argument lists, partially-built
    /// scopes) may be live.
    pub(crate) fn maybe_gc(&mut self, last: &mut Value) {
        if self.flags & F_CALL != 0 {
            return;
        }
        let requested = std::mem::take(&mut self.gc_requested);
        let over = self.arena.brk() > self.arena.capacity() / 2;
        if !requested && !over && !cfg!(feature = "gc-stress") {
            return;
        }
        let mut scope = self.scope;
        collect(&mut self.arena, &mut [&mut scope, last], &mut self.pins);
        self.scope = scope;
    }

    #[inline]
    pub(crate) fn enter(&mut self) -> Result<(), Value> {
        if self.depth >= self.max_depth {
            return Err(self.throw("stack exhausted"));
        }
        self.depth += 1;
        Ok(())
    }

    #[inline]
    pub(crate) fn leave(&mut self) {
        self.depth -= 1;
    }

    /// The content of a String value, if `v` is one.
    pub fn string_value(&self, v: Value) -> Option<String> {
        let v = self.arena.deref_property(v);
        (v.type_of() == Type::String)
            .then(|| String::from_utf8_lossy(self.arena.string_bytes(v.offset())).into_owned())
    }

    /// Render a value the way the REPL shows results.
    pub fn to_display_string(&self, v: Value) -> String {
        let v = self.arena.deref_property(v);
        match v.type_of() {
            Type::Number => format!("{}", v.as_number()),
            Type::Undefined => "undefined".into(),
            Type::Null => "null".into(),
            Type::Boolean => if v.as_boolean() { "true" } else { "false" }.into(),
            Type::String => {
                let s = String::from_utf8_lossy(self.arena.string_bytes(v.offset()));
                format!("\"{s}\"")
            }
            Type::Object => self.display_object(v.offset()),
            Type::Function if v.is_native_function() => "function(){[native code]}".into(),
            Type::Function => {
                let src = String::from_utf8_lossy(self.arena.string_bytes(v.offset()));
                format!("function{src}")
            }
            Type::Error => self.error_message().into(),
            // Transient parser values never reach the host.
            Type::Property | Type::CodeRef => "undefined".into(),
        }
    }

    fn display_object(&self, obj: Offset) -> String {
        let mut out = String::from("{");
        let mut seen: Vec<Vec<u8>> = Vec::new();
        let mut cur = self.arena.first_property(obj);
        while let Some(p) = cur {
            let key = self.arena.string_bytes(self.arena.property_key(p));
            // The list head shadows later records with the same key.
            if !seen.iter().any(|k| k == key) {
                if !seen.is_empty() {
                    out.push(',');
                }
                out.push_str(&String::from_utf8_lossy(key));
                out.push(':');
                out.push_str(&self.to_display_string(self.arena.property_value(p)));
                seen.push(key.to_vec());
            }
            cur = self.arena.next_property(p);
        }
        out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_buffer_sizes() {
        assert_eq!(Context::new(0).err(), Some(CreateError::TooSmall));
        assert_eq!(Context::new(7).err(), Some(CreateError::TooSmall));
        assert!(Context::new(8).is_ok());

        // A rejected buffer comes back byte-for-byte untouched.
        let buf = vec![0xab; 4];
        let (err, returned) = match Context::from_buffer(buf) {
            Err(e) => e,
            Ok(_) => panic!("undersized buffer accepted"),
        };
        assert_eq!(err, CreateError::TooSmall);
        assert_eq!(returned, vec![0xab; 4]);
    }

    #[test]
    fn test_rejects_oversized_buffer() {
        // At MAX_BUFFER a String header's length field would reach the
        // reclaimer's mark bit. The zeroed pages are never touched: the
        // size check runs before any write.
        let err = match Context::from_buffer(vec![0; MAX_BUFFER]) {
            Err((e, _)) => e,
            Ok(_) => panic!("oversized buffer accepted"),
        };
        assert_eq!(err, CreateError::TooLarge);
    }

    #[test]
    fn test_fresh_context_has_root_scope_only() {
        let ctx = Context::new(1024).unwrap();
        assert_eq!(ctx.memory_usage().0, 8);
        assert_eq!(ctx.scope.offset(), 0);
    }

    #[test]
    fn test_throw_records_and_truncates() {
        let mut ctx = Context::new(256).unwrap();
        let v = ctx.throw("bad things");
        assert!(v.is_err());
        assert_eq!(ctx.error_message(), "ERROR: bad things");

        ctx.throw("an exceedingly long explanation that cannot fit");
        assert!(ctx.error_message().len() < ERRMSG_SIZE);
        assert!(ctx.error_message().starts_with("ERROR: an exceedingly"));
    }

    #[test]
    fn test_register_binds_global() {
        fn answer(_: &mut Context, _: &[Value]) -> Value {
            Value::number(42.0)
        }
        let mut ctx = Context::new(1024).unwrap();
        ctx.register("answer", answer).unwrap();
        let (_, p) = ctx.arena.resolve(0, b"answer").unwrap();
        let v = ctx.arena.property_value(p);
        assert!(v.is_native_function());
    }

    #[test]
    fn test_manual_gc_keeps_globals() {
        let mut ctx = Context::new(1024).unwrap();
        ctx.arena.set_property(0, b"keep", Value::number(1.0)).unwrap();
        ctx.arena.create_string(b"garbage").unwrap();
        let stats = ctx.gc();
        assert!(stats.reclaimed_bytes > 0);
        let (_, p) = ctx.arena.resolve(0, b"keep").unwrap();
        assert_eq!(ctx.arena.property_value(p).as_number(), 1.0);
    }

    #[test]
    fn test_display_strings() {
        let mut ctx = Context::new(1024).unwrap();
        assert_eq!(ctx.to_display_string(Value::number(3.0)), "3");
        assert_eq!(ctx.to_display_string(Value::number(1.5)), "1.5");
        assert_eq!(ctx.to_display_string(Value::UNDEFINED), "undefined");
        assert_eq!(ctx.to_display_string(Value::TRUE), "true");

        let obj = ctx.arena.create_object(0).unwrap();
        ctx.arena.set_property(obj, b"a", Value::number(1.0)).unwrap();
        ctx.arena.set_property(obj, b"a", Value::number(2.0)).unwrap();
        let v = Value::new(Type::Object, obj as u64);
        // Shadowed record is hidden.
        assert_eq!(ctx.to_display_string(v), "{a:2}");
    }
}
