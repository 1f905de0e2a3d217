//! NaN-boxed value representation
//!
//! Every value the interpreter handles is a single 64-bit word. Ordinary
//! numbers are stored directly as IEEE-754 doubles; everything else rides
//! inside the quiet-NaN space: sign bit clear, exponent all ones, a 4-bit
//! type tag in the top mantissa nibble and up to 48 bits of payload below.
//!
//! # Encoding
//! ```text
//! boxed:  0x7ff0 | type  (16 bits)  |  payload (48 bits)
//! number: any other bit pattern, read as f64
//! ```
//!
//! Ref-typed payloads are arena byte offsets and are only meaningful
//! together with the [`Arena`](crate::gc::Arena) they point into.

use std::fmt;

/// Arena byte offset. Kept distinct from native references on purpose: the
/// reclaimer relocates entities and rewrites offsets, which no Rust
/// reference could survive.
pub type Offset = u32;

/// Base bit pattern shared by all boxed values.
const BOX_BASE: u64 = 0x7ff0 << 48;

/// Mask selecting sign + exponent: a value is boxed iff these bits all
/// match `BOX_BASE` (sign clear, exponent all ones).
const BOX_TEST: u64 = 0xfff0 << 48;

/// Mask selecting the 48-bit payload of a boxed value.
const PAYLOAD_MASK: u64 = (1 << 48) - 1;

/// Bit 47 of a Function payload: set for native functions (the rest of the
/// payload is an index into the context's native table), clear for
/// interpreted functions (the payload is a String entity offset).
pub const FUNC_NATIVE_BIT: u64 = 1 << 47;

/// Value type tag.
///
/// The first three variants double as entity tags in arena headers and
/// must keep values 0/1/2 (the low two bits of every entity header).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Object = 0,
    Property = 1,
    String = 2,
    Undefined = 3,
    Null = 4,
    Number = 5,
    Boolean = 6,
    Function = 7,
    /// Transient {offset, length} pair naming a range of unevaluated
    /// source text. Only exists while parsing, never stored in the arena.
    CodeRef = 8,
    Error = 9,
}

impl Type {
    /// Decode a tag nibble. Only 0..=9 are ever produced by [`Value::new`].
    #[inline]
    pub const fn from_nibble(n: u8) -> Type {
        match n & 0xf {
            0 => Type::Object,
            1 => Type::Property,
            2 => Type::String,
            3 => Type::Undefined,
            4 => Type::Null,
            5 => Type::Number,
            6 => Type::Boolean,
            7 => Type::Function,
            8 => Type::CodeRef,
            _ => Type::Error,
        }
    }
}

/// A tagged 64-bit value.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const UNDEFINED: Value = Value::new(Type::Undefined, 0);
    pub const NULL: Value = Value::new(Type::Null, 0);
    pub const TRUE: Value = Value::new(Type::Boolean, 1);
    pub const FALSE: Value = Value::new(Type::Boolean, 0);
    pub const ERROR: Value = Value::new(Type::Error, 0);

    /// Box a type tag and a 48-bit payload.
    #[inline]
    pub const fn new(t: Type, payload: u64) -> Value {
        debug_assert!(payload <= PAYLOAD_MASK);
        Value(BOX_BASE | ((t as u64) << 48) | payload)
    }

    /// Store a double directly.
    ///
    /// NaN inputs are canonicalized to the sign-negative quiet NaN so a
    /// computed NaN can never alias a boxed value.
    #[inline]
    pub fn number(d: f64) -> Value {
        if d.is_nan() {
            Value(0xfff8 << 48)
        } else {
            Value(d.to_bits())
        }
    }

    #[inline]
    pub const fn boolean(b: bool) -> Value {
        if b { Value::TRUE } else { Value::FALSE }
    }

    /// Interpreted function: payload is the offset of the String entity
    /// holding the `(params){body}` source text.
    #[inline]
    pub const fn function(code_str: Offset) -> Value {
        Value::new(Type::Function, code_str as u64)
    }

    /// Native function: payload is an index into the context's native
    /// function table, with [`FUNC_NATIVE_BIT`] set.
    #[inline]
    pub const fn native_function(index: u32) -> Value {
        Value::new(Type::Function, FUNC_NATIVE_BIT | index as u64)
    }

    /// Code reference: {offset, length} packed 24/24 into the payload.
    #[inline]
    pub const fn coderef(off: u32, len: u32) -> Value {
        debug_assert!(off < (1 << 24) && len < (1 << 24));
        Value::new(Type::CodeRef, ((off as u64) << 24) | len as u64)
    }

    #[inline]
    const fn is_boxed(self) -> bool {
        (self.0 & BOX_TEST) == BOX_BASE
    }

    /// The type of this value.
    #[inline]
    pub const fn type_of(self) -> Type {
        if self.is_boxed() {
            Type::from_nibble((self.0 >> 48) as u8)
        } else {
            Type::Number
        }
    }

    /// The 48-bit payload of a boxed value. Calling this on a Number is a
    /// contract violation; numbers are unpacked with [`Value::as_number`].
    #[inline]
    pub const fn payload(self) -> u64 {
        debug_assert!(self.is_boxed());
        self.0 & PAYLOAD_MASK
    }

    /// The payload interpreted as an arena offset.
    #[inline]
    pub const fn offset(self) -> Offset {
        self.payload() as Offset
    }

    /// Unpack the {offset, length} pair of a CodeRef.
    #[inline]
    pub const fn coderef_parts(self) -> (u32, u32) {
        let p = self.payload();
        ((p >> 24) as u32, (p & 0xff_ffff) as u32)
    }

    /// Read back a number. Boxed values decode as NaN, which is fine:
    /// callers check `type_of` first.
    #[inline]
    pub const fn as_number(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline]
    pub const fn as_boolean(self) -> bool {
        self.payload() != 0
    }

    #[inline]
    pub const fn is_err(self) -> bool {
        self.is_boxed() && matches!(self.type_of(), Type::Error)
    }

    /// True for a Function value backed by a native table index.
    #[inline]
    pub const fn is_native_function(self) -> bool {
        matches!(self.type_of(), Type::Function) && (self.payload() & FUNC_NATIVE_BIT) != 0
    }

    /// Raw bit pattern, as stored in Property records.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Value {
        Value(bits)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::UNDEFINED
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_of() {
            Type::Number => write!(f, "Number({})", self.as_number()),
            Type::Undefined => write!(f, "Undefined"),
            Type::Null => write!(f, "Null"),
            Type::Boolean => write!(f, "Boolean({})", self.as_boolean()),
            Type::Error => write!(f, "Error"),
            Type::CodeRef => {
                let (off, len) = self.coderef_parts();
                write!(f, "CodeRef({off}+{len})")
            }
            Type::Function if self.is_native_function() => {
                write!(f, "NativeFunction({})", self.payload() & !FUNC_NATIVE_BIT)
            }
            t => write!(f, "{:?}@{}", t, self.offset()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_round_trip() {
        for d in [0.0, -0.0, 1.0, -1.5, 12.25, 1e300, f64::MIN_POSITIVE] {
            let v = Value::number(d);
            assert_eq!(v.type_of(), Type::Number);
            assert_eq!(v.as_number().to_bits(), d.to_bits());
        }
    }

    #[test]
    fn test_nan_is_canonicalized() {
        let v = Value::number(f64::from_bits(0x7ff8_0000_0000_0001));
        assert_eq!(v.type_of(), Type::Number);
        assert!(v.as_number().is_nan());
        // And it never aliases a boxed value.
        assert!(!v.is_err());
    }

    #[test]
    fn test_negative_infinity_is_number() {
        let v = Value::number(f64::NEG_INFINITY);
        assert_eq!(v.type_of(), Type::Number);
        assert_eq!(v.as_number(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_boxed_tags() {
        assert_eq!(Value::UNDEFINED.type_of(), Type::Undefined);
        assert_eq!(Value::NULL.type_of(), Type::Null);
        assert_eq!(Value::TRUE.type_of(), Type::Boolean);
        assert!(Value::TRUE.as_boolean());
        assert!(!Value::FALSE.as_boolean());
        assert!(Value::ERROR.is_err());
        assert!(!Value::UNDEFINED.is_err());
    }

    #[test]
    fn test_ref_payloads() {
        let v = Value::new(Type::String, 0x1234);
        assert_eq!(v.type_of(), Type::String);
        assert_eq!(v.offset(), 0x1234);

        let o = Value::new(Type::Object, 0);
        assert_eq!(o.type_of(), Type::Object);
        assert_eq!(o.offset(), 0);
    }

    #[test]
    fn test_ref_equality_is_offset_equality() {
        assert_eq!(Value::new(Type::Object, 8), Value::new(Type::Object, 8));
        assert_ne!(Value::new(Type::Object, 8), Value::new(Type::Object, 16));
        assert_ne!(Value::new(Type::Object, 8), Value::new(Type::String, 8));
    }

    #[test]
    fn test_coderef_parts() {
        let v = Value::coderef(1000, 42);
        assert_eq!(v.type_of(), Type::CodeRef);
        assert_eq!(v.coderef_parts(), (1000, 42));
    }

    #[test]
    fn test_function_kinds() {
        let interp = Value::function(64);
        assert_eq!(interp.type_of(), Type::Function);
        assert!(!interp.is_native_function());
        assert_eq!(interp.offset(), 64);

        let native = Value::native_function(3);
        assert_eq!(native.type_of(), Type::Function);
        assert!(native.is_native_function());
        assert_eq!(native.payload() & !FUNC_NATIVE_BIT, 3);
    }
}
