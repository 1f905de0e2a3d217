//! Statement execution and expression evaluation
//!
//! The interpreter is a recursive-descent evaluator that runs directly off
//! the token stream: there is no AST. Each precedence level is a method
//! that consumes its operators and folds values as it goes. Control flow
//! that must skip code it cannot take (the untaken ternary branch, the
//! short-circuited operand, a function literal's body) parses it with the
//! no-execute flag set, which walks the tokens without touching the arena.
//!
//! Identifiers and member accesses evaluate to Property-refs, not stored
//! values, so assignment and increment know which record they are
//! rewriting. Everything that consumes a value as data dereferences first.

use crate::context::{Context, F_BREAK, F_CALL, F_LOOP, F_NOEXEC, F_RETURN};
use crate::parser::lexer::unescape;
use crate::parser::{Lexer, Token, TokenKind};
use crate::runtime::entity::OBJECT_SIZE;
use crate::value::{FUNC_NATIVE_BIT, Offset, Type, Value};

fn is_assign_op(k: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        k,
        Eq | PlusEq
            | MinusEq
            | StarEq
            | SlashEq
            | PercentEq
            | StarStarEq
            | LtLtEq
            | GtGtEq
            | GtGtGtEq
            | AmpEq
            | PipeEq
            | CaretEq
    )
}

/// The binary operator a compound assignment applies before storing.
fn binary_of_assign(k: TokenKind) -> TokenKind {
    use TokenKind::*;
    match k {
        PlusEq => Plus,
        MinusEq => Minus,
        StarEq => Star,
        SlashEq => Slash,
        PercentEq => Percent,
        StarStarEq => StarStar,
        LtLtEq => LtLt,
        GtGtEq => GtGt,
        GtGtGtEq => GtGtGt,
        AmpEq => Amp,
        PipeEq => Pipe,
        CaretEq => Caret,
        _ => k,
    }
}

/// Operand conversion for the bitwise and shift operators.
fn to_int32(d: f64) -> i32 {
    if !d.is_finite() {
        0
    } else {
        (d as i64 & 0xffff_ffff) as u32 as i32
    }
}

fn type_name(v: Value) -> &'static str {
    match v.type_of() {
        Type::Object => "object",
        Type::String => "string",
        Type::Undefined => "undefined",
        Type::Null => "null",
        Type::Number => "number",
        Type::Boolean => "boolean",
        Type::Function => "function",
        _ => "undefined",
    }
}

impl Context {
    /// Top-level statement loop: the body of one `eval`.
    pub(crate) fn run_statements(&mut self) -> Value {
        let mut res = Value::UNDEFINED;
        while !self.lexer.at_end() {
            if self.lexer.peek().kind == TokenKind::Semicolon {
                self.lexer.advance();
                continue;
            }
            res = self.statement();
            if res.is_err() {
                return res;
            }
            res = self.arena.deref_property(res);
            self.maybe_gc(&mut res);
        }
        res
    }

    fn statement(&mut self) -> Value {
        match self.lexer.peek().kind {
            TokenKind::LBrace => self.block(),
            TokenKind::Let => self.let_statement(),
            TokenKind::Break => self.break_statement(),
            TokenKind::Continue => self.continue_statement(),
            TokenKind::Return => self.return_statement(),
            _ => self.expression_statement(),
        }
    }

    /// Expect a statement terminator: `;` (consumed), or a `}`/end that the
    /// caller owns.
    fn terminator(&mut self, res: Value) -> Value {
        let t = self.lexer.peek();
        match t.kind {
            TokenKind::Semicolon => {
                self.lexer.advance();
                res
            }
            TokenKind::Eof | TokenKind::RBrace => res,
            _ => self.unexpected(t),
        }
    }

    fn expression_statement(&mut self) -> Value {
        let res = self.expression();
        if res.is_err() {
            return res;
        }
        self.terminator(res)
    }

    /// `let name [= expr][, name2 [= expr2]...];`. A repeated declaration
    /// prepends a fresh record that shadows the earlier one.
    fn let_statement(&mut self) -> Value {
        self.lexer.advance();
        loop {
            let name_t = self.lexer.peek();
            if name_t.kind != TokenKind::Ident {
                return self.unexpected(name_t);
            }
            self.lexer.advance();
            let name = self.lexer.token_bytes(name_t).to_vec();

            let mut val = Value::UNDEFINED;
            if self.lexer.peek().kind == TokenKind::Eq {
                self.lexer.advance();
                val = self.assignment();
                if val.is_err() {
                    return val;
                }
                val = self.arena.deref_property(val);
            }
            if self.flags & F_NOEXEC == 0
                && self
                    .arena
                    .set_property(self.scope.offset(), &name, val)
                    .is_none()
            {
                return self.oom();
            }

            if self.lexer.peek().kind == TokenKind::Comma {
                self.lexer.advance();
                continue;
            }
            return self.terminator(val);
        }
    }

    fn break_statement(&mut self) -> Value {
        self.lexer.advance();
        if self.flags & F_NOEXEC == 0 {
            if self.flags & F_LOOP == 0 {
                return self.throw("not in a loop");
            }
            self.flags |= F_BREAK;
        }
        Value::UNDEFINED
    }

    fn continue_statement(&mut self) -> Value {
        self.lexer.advance();
        if self.flags & F_NOEXEC == 0 {
            if self.flags & F_LOOP == 0 {
                return self.throw("not in a loop");
            }
            // Skip the rest of the iteration; the loop driver re-enables
            // execution at the top of the next one.
            self.flags |= F_NOEXEC;
        }
        Value::UNDEFINED
    }

    fn return_statement(&mut self) -> Value {
        self.lexer.advance();
        if self.flags & (F_NOEXEC | F_CALL) == 0 {
            return self.throw("not in a function");
        }
        let t = self.lexer.peek();
        let res = if matches!(
            t.kind,
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        ) {
            Value::UNDEFINED
        } else {
            let v = self.expression();
            if v.is_err() {
                return v;
            }
            self.arena.deref_property(v)
        };
        if self.flags & F_NOEXEC == 0 {
            self.flags |= F_RETURN;
        }
        res
    }

    fn block(&mut self) -> Value {
        if let Err(e) = self.enter() {
            return e;
        }
        let res = self.block_scoped();
        self.leave();
        res
    }

    fn block_scoped(&mut self) -> Value {
        self.lexer.advance(); // {
        if self.flags & F_NOEXEC != 0 {
            return self.block_body();
        }
        let mark = self.arena.brk();
        let Some(inner) = self.arena.create_object(self.scope.offset()) else {
            return self.oom();
        };
        let saved = self.scope;
        self.scope = Value::new(Type::Object, inner as u64);
        let res = self.block_body();
        self.scope = saved;
        // A block that allocated nothing but its own scope object is undone
        // wholesale; anything else stays until the reclaimer runs.
        if self.arena.brk() == mark + OBJECT_SIZE {
            self.arena.set_brk(mark);
        }
        res
    }

    /// Statements up to the closing `}` (consumed). Shared by blocks and
    /// function bodies; the caller sets up scope and flags.
    pub(crate) fn block_body(&mut self) -> Value {
        let mut res = Value::UNDEFINED;
        loop {
            let t = self.lexer.peek();
            match t.kind {
                TokenKind::RBrace => {
                    self.lexer.advance();
                    return res;
                }
                TokenKind::Eof => return self.throw("unbalanced block"),
                TokenKind::Semicolon => {
                    self.lexer.advance();
                }
                _ if self.flags & (F_BREAK | F_RETURN) != 0 => {
                    // Unwinding: the remaining statements still have to
                    // parse, but must not run or disturb the result.
                    let v = self.with_noexec(Self::statement);
                    if v.is_err() {
                        return v;
                    }
                }
                _ => {
                    res = self.statement();
                    if res.is_err() {
                        return res;
                    }
                    res = self.arena.deref_property(res);
                }
            }
        }
    }

    fn with_noexec(&mut self, f: impl FnOnce(&mut Self) -> Value) -> Value {
        let saved = self.flags;
        self.flags |= F_NOEXEC;
        let res = f(self);
        self.flags = saved;
        res
    }

    // ---- expressions, lowest precedence first ----

    pub(crate) fn expression(&mut self) -> Value {
        let mut res = self.assignment();
        while !res.is_err() && self.lexer.peek().kind == TokenKind::Comma {
            self.lexer.advance();
            res = self.assignment();
        }
        res
    }

    fn assignment(&mut self) -> Value {
        if let Err(e) = self.enter() {
            return e;
        }
        let res = self.assignment_inner();
        self.leave();
        res
    }

    fn assignment_inner(&mut self) -> Value {
        let lhs = self.ternary();
        if lhs.is_err() {
            return lhs;
        }
        let op = self.lexer.peek().kind;
        if !is_assign_op(op) {
            return lhs;
        }
        self.lexer.advance();
        // The owner must be read now: evaluating the right side may resolve
        // other identifiers and overwrite it.
        let owner = self.lvalue_owner;
        let rhs = self.assignment();
        if rhs.is_err() {
            return rhs;
        }
        self.apply_assign(op, owner, lhs, rhs)
    }

    fn apply_assign(&mut self, op: TokenKind, owner: Offset, lhs: Value, rhs: Value) -> Value {
        if self.flags & F_NOEXEC != 0 {
            return rhs;
        }
        if lhs.type_of() != Type::Property {
            return self.throw("bad left-hand side");
        }
        let rhs = self.arena.deref_property(rhs);
        let newval = if op == TokenKind::Eq {
            rhs
        } else {
            let cur = self.arena.deref_property(lhs);
            let v = self.binary_op(binary_of_assign(op), cur, rhs);
            if v.is_err() {
                return v;
            }
            v
        };
        // Writes never mutate: prepend a shadowing record, reusing the key.
        let key = self.arena.property_key(lhs.offset());
        match self.arena.create_property(owner, key, newval) {
            Some(p) => Value::new(Type::Property, p as u64),
            None => self.oom(),
        }
    }

    fn ternary(&mut self) -> Value {
        let cond = self.logical_or();
        if cond.is_err() {
            return cond;
        }
        if self.lexer.peek().kind != TokenKind::Question {
            return cond;
        }
        self.lexer.advance();
        let exec = self.flags & F_NOEXEC == 0;
        let take = exec && self.truthy_value(cond);

        let on_true = if take {
            self.assignment()
        } else {
            self.with_noexec(Self::assignment)
        };
        if on_true.is_err() {
            return on_true;
        }
        let colon = self.lexer.peek();
        if colon.kind != TokenKind::Colon {
            return self.unexpected(colon);
        }
        self.lexer.advance();
        let on_false = if exec && !take {
            self.assignment()
        } else {
            self.with_noexec(Self::assignment)
        };
        if on_false.is_err() {
            return on_false;
        }
        if take { on_true } else { on_false }
    }

    fn logical_or(&mut self) -> Value {
        let mut lhs = self.logical_and();
        if lhs.is_err() {
            return lhs;
        }
        while self.lexer.peek().kind == TokenKind::PipePipe {
            self.lexer.advance();
            let exec = self.flags & F_NOEXEC == 0;
            let short = exec && self.truthy_value(lhs);
            let rhs = if short {
                self.with_noexec(Self::logical_and)
            } else {
                self.logical_and()
            };
            if rhs.is_err() {
                return rhs;
            }
            lhs = if !exec {
                Value::UNDEFINED
            } else if short {
                Value::TRUE
            } else {
                Value::boolean(self.truthy_value(rhs))
            };
        }
        lhs
    }

    fn logical_and(&mut self) -> Value {
        let mut lhs = self.bit_or();
        if lhs.is_err() {
            return lhs;
        }
        while self.lexer.peek().kind == TokenKind::AmpAmp {
            self.lexer.advance();
            let exec = self.flags & F_NOEXEC == 0;
            let short = exec && !self.truthy_value(lhs);
            let rhs = if short {
                self.with_noexec(Self::bit_or)
            } else {
                self.bit_or()
            };
            if rhs.is_err() {
                return rhs;
            }
            lhs = if !exec {
                Value::UNDEFINED
            } else if short {
                Value::FALSE
            } else {
                Value::boolean(self.truthy_value(rhs))
            };
        }
        lhs
    }

    fn binary_level(&mut self, ops: &[TokenKind], next: fn(&mut Self) -> Value) -> Value {
        let mut lhs = next(self);
        if lhs.is_err() {
            return lhs;
        }
        while ops.contains(&self.lexer.peek().kind) {
            let op = self.lexer.advance().kind;
            let rhs = next(self);
            if rhs.is_err() {
                return rhs;
            }
            lhs = self.binary_op(op, lhs, rhs);
            if lhs.is_err() {
                return lhs;
            }
        }
        lhs
    }

    fn bit_or(&mut self) -> Value {
        self.binary_level(&[TokenKind::Pipe], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Value {
        self.binary_level(&[TokenKind::Caret], Self::bit_and)
    }

    fn bit_and(&mut self) -> Value {
        self.binary_level(&[TokenKind::Amp], Self::equality)
    }

    fn equality(&mut self) -> Value {
        use TokenKind::*;
        self.binary_level(&[EqEq, EqEqEq, BangEq, BangEqEq], Self::relational)
    }

    fn relational(&mut self) -> Value {
        use TokenKind::*;
        self.binary_level(&[Lt, LtEq, Gt, GtEq], Self::shift)
    }

    fn shift(&mut self) -> Value {
        use TokenKind::*;
        self.binary_level(&[LtLt, GtGt, GtGtGt], Self::additive)
    }

    fn additive(&mut self) -> Value {
        use TokenKind::*;
        self.binary_level(&[Plus, Minus], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Value {
        use TokenKind::*;
        self.binary_level(&[Star, Slash, Percent], Self::exponent)
    }

    /// `**` is the one right-associative binary operator.
    fn exponent(&mut self) -> Value {
        let base = self.unary();
        if base.is_err() {
            return base;
        }
        if self.lexer.peek().kind != TokenKind::StarStar {
            return base;
        }
        self.lexer.advance();
        if let Err(e) = self.enter() {
            return e;
        }
        let exp = self.exponent();
        self.leave();
        if exp.is_err() {
            return exp;
        }
        self.binary_op(TokenKind::StarStar, base, exp)
    }

    fn unary(&mut self) -> Value {
        use TokenKind::*;
        let t = self.lexer.peek();
        match t.kind {
            Bang | Tilde | Plus | Minus | TypeOf => {
                self.lexer.advance();
                if let Err(e) = self.enter() {
                    return e;
                }
                let v = self.unary();
                self.leave();
                if v.is_err() {
                    return v;
                }
                self.unary_op(t.kind, v)
            }
            PlusPlus | MinusMinus => {
                self.lexer.advance();
                if let Err(e) = self.enter() {
                    return e;
                }
                let v = self.unary();
                self.leave();
                if v.is_err() {
                    return v;
                }
                let delta = if t.kind == PlusPlus { 1.0 } else { -1.0 };
                self.increment(v, delta, false)
            }
            _ => self.postfix(),
        }
    }

    fn unary_op(&mut self, op: TokenKind, v: Value) -> Value {
        if self.flags & F_NOEXEC != 0 {
            return Value::UNDEFINED;
        }
        let v = self.arena.deref_property(v);
        match op {
            TokenKind::Bang => Value::boolean(!self.truthy_value(v)),
            TokenKind::TypeOf => self.make_string(type_name(v).as_bytes()),
            TokenKind::Tilde => {
                if v.type_of() != Type::Number {
                    return self.throw("type mismatch");
                }
                Value::number(!to_int32(v.as_number()) as f64)
            }
            TokenKind::Plus => {
                if v.type_of() != Type::Number {
                    return self.throw("type mismatch");
                }
                v
            }
            _ => {
                if v.type_of() != Type::Number {
                    return self.throw("type mismatch");
                }
                Value::number(-v.as_number())
            }
        }
    }

    /// Shared by `++x`, `x++` and the `--` forms: store `old + delta` in a
    /// shadowing record, yield the old value (postfix) or the new binding
    /// (prefix).
    fn increment(&mut self, v: Value, delta: f64, return_old: bool) -> Value {
        if self.flags & F_NOEXEC != 0 {
            return Value::UNDEFINED;
        }
        if v.type_of() != Type::Property {
            return self.throw("bad left-hand side");
        }
        let owner = self.lvalue_owner;
        let old = self.arena.deref_property(v);
        if old.type_of() != Type::Number {
            return self.throw("type mismatch");
        }
        let key = self.arena.property_key(v.offset());
        let newval = Value::number(old.as_number() + delta);
        match self.arena.create_property(owner, key, newval) {
            Some(_) if return_old => old,
            Some(p) => Value::new(Type::Property, p as u64),
            None => self.oom(),
        }
    }

    fn postfix(&mut self) -> Value {
        let mut res = self.primary();
        loop {
            if res.is_err() {
                return res;
            }
            let t = self.lexer.peek();
            match t.kind {
                TokenKind::Dot => {
                    self.lexer.advance();
                    res = self.member(res);
                }
                TokenKind::LParen => {
                    res = self.call(res);
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    self.lexer.advance();
                    let delta = if t.kind == TokenKind::PlusPlus { 1.0 } else { -1.0 };
                    res = self.increment(res, delta, true);
                }
                _ => return res,
            }
        }
    }

    fn member(&mut self, target: Value) -> Value {
        let name_t = self.lexer.peek();
        if name_t.kind != TokenKind::Ident {
            return self.unexpected(name_t);
        }
        self.lexer.advance();
        if self.flags & F_NOEXEC != 0 {
            return Value::UNDEFINED;
        }
        let target = self.arena.deref_property(target);
        if target.type_of() != Type::Object {
            return self.throw("lookup in non-object");
        }
        let obj = target.offset();
        let name = self.lexer.token_bytes(name_t).to_vec();
        self.lvalue_owner = obj;
        match self.arena.lookup_property(obj, &name) {
            Some(p) => Value::new(Type::Property, p as u64),
            // A fresh key about to receive a plain `=` needs a record to
            // overwrite. Compound assignment reads the key first, so it
            // must fail without leaving a binding behind.
            None if self.lexer.peek().kind == TokenKind::Eq => {
                match self.arena.set_property(obj, &name, Value::UNDEFINED) {
                    Some(r) => r,
                    None => self.oom(),
                }
            }
            None => Value::UNDEFINED,
        }
    }

    /// Capture the argument list as a source range without evaluating it,
    /// then dispatch. Token-level scanning keeps parens inside strings and
    /// nested calls balanced for free.
    fn call(&mut self, func: Value) -> Value {
        let lparen = self.lexer.advance();
        let args_off = lparen.end();
        let mut depth = 1u32;
        loop {
            let t = self.lexer.advance();
            match t.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        let args = Value::coderef(args_off, t.off - args_off);
                        return self.invoke(func, args);
                    }
                }
                TokenKind::Eof => return self.throw("unbalanced call"),
                _ => {}
            }
        }
    }

    fn invoke(&mut self, func: Value, args: Value) -> Value {
        if self.flags & F_NOEXEC != 0 {
            return Value::UNDEFINED;
        }
        let func = self.arena.deref_property(func);
        if func.type_of() != Type::Function {
            return self.throw("calling non-function");
        }
        if func.is_native_function() {
            self.call_native(func, args)
        } else {
            let code_str = func.offset();
            // Pin the body string: a host function running inside this
            // call may trigger reclamation.
            self.pins.push(code_str);
            let res = self.call_interpreted(code_str, args);
            self.pins.pop();
            res
        }
    }

    /// Evaluate the captured arguments left to right in the current scope
    /// and hand them to the host function.
    fn call_native(&mut self, func: Value, args: Value) -> Value {
        let idx = (func.payload() & !FUNC_NATIVE_BIT) as usize;
        let (off, len) = args.coderef_parts();

        let mut argv: Vec<Value> = Vec::new();
        self.lexer.set_pos(off);
        if self.lexer.peek().kind != TokenKind::RParen {
            loop {
                let v = self.assignment();
                if v.is_err() {
                    return v;
                }
                argv.push(self.arena.deref_property(v));
                if self.lexer.peek().kind != TokenKind::Comma {
                    break;
                }
                self.lexer.advance();
            }
        }
        let t = self.lexer.peek();
        if t.kind != TokenKind::RParen {
            return self.unexpected(t);
        }
        self.lexer.set_pos(off + len + 1);

        let f = self.natives[idx];
        f(self, &argv)
    }

    fn call_interpreted(&mut self, code_str: Offset, args: Value) -> Value {
        if let Err(e) = self.enter() {
            return e;
        }
        let res = self.call_interpreted_inner(code_str, args);
        self.leave();
        res
    }

    fn call_interpreted_inner(&mut self, code_str: Offset, args: Value) -> Value {
        // Work on a copy of the `(params){body}` text: reclamation can move
        // the String entity while the call runs.
        let text = self.arena.string_bytes(code_str).to_vec();

        let mut sig = Lexer::new(&text);
        if sig.advance().kind != TokenKind::LParen {
            return self.throw("bad function");
        }
        let mut names: Vec<Vec<u8>> = Vec::new();
        loop {
            let t = sig.advance();
            match t.kind {
                TokenKind::RParen => break,
                TokenKind::Ident => {
                    names.push(sig.token_bytes(t).to_vec());
                    match sig.peek().kind {
                        TokenKind::Comma => {
                            sig.advance();
                        }
                        TokenKind::RParen => {}
                        _ => return self.throw("bad function"),
                    }
                }
                _ => return self.throw("bad function"),
            }
        }
        let body_off = sig.peek().off;

        let caller_scope = self.scope;
        let Some(fn_scope) = self.arena.create_object(caller_scope.offset()) else {
            return self.oom();
        };

        // Arguments evaluate in the caller's scope, binding into the new
        // one; surplus arguments still run, missing parameters read as
        // undefined.
        let (off, len) = args.coderef_parts();
        self.lexer.set_pos(off);
        let mut i = 0;
        if self.lexer.peek().kind != TokenKind::RParen {
            loop {
                let v = self.assignment();
                if v.is_err() {
                    return v;
                }
                let v = self.arena.deref_property(v);
                if i < names.len()
                    && self.arena.set_property(fn_scope, &names[i], v).is_none()
                {
                    return self.oom();
                }
                i += 1;
                if self.lexer.peek().kind != TokenKind::Comma {
                    break;
                }
                self.lexer.advance();
            }
        }
        let t = self.lexer.peek();
        if t.kind != TokenKind::RParen {
            return self.unexpected(t);
        }
        while i < names.len() {
            if self
                .arena
                .set_property(fn_scope, &names[i], Value::UNDEFINED)
                .is_none()
            {
                return self.oom();
            }
            i += 1;
        }

        let saved_flags = self.flags;
        self.flags = F_CALL;
        self.scope = Value::new(Type::Object, fn_scope as u64);

        let mut body = Lexer::new(&text);
        body.set_pos(body_off);
        std::mem::swap(&mut self.lexer, &mut body);

        let res = if self.lexer.advance().kind != TokenKind::LBrace {
            self.throw("bad function")
        } else {
            self.block_body()
        };

        std::mem::swap(&mut self.lexer, &mut body);
        self.scope = caller_scope;
        let returned = self.flags & F_RETURN != 0;
        self.flags = saved_flags;

        if res.is_err() {
            // The error already abandoned the body's stream; abandon the
            // caller's too.
            self.lexer.skip_to_end();
            return res;
        }
        self.lexer.set_pos(off + len + 1);
        if returned { res } else { Value::UNDEFINED }
    }

    fn primary(&mut self) -> Value {
        use TokenKind::*;
        let t = self.lexer.peek();
        match t.kind {
            Number => {
                self.lexer.advance();
                Value::number(t.num)
            }
            Str => {
                self.lexer.advance();
                if self.flags & F_NOEXEC != 0 {
                    return Value::UNDEFINED;
                }
                let bytes = unescape(self.lexer.token_bytes(t));
                self.make_string(&bytes)
            }
            Ident => {
                self.lexer.advance();
                self.identifier(t)
            }
            True => {
                self.lexer.advance();
                Value::TRUE
            }
            False => {
                self.lexer.advance();
                Value::FALSE
            }
            Null => {
                self.lexer.advance();
                Value::NULL
            }
            Undefined => {
                self.lexer.advance();
                Value::UNDEFINED
            }
            Function => self.function_literal(),
            LParen => {
                self.lexer.advance();
                let v = self.expression();
                if v.is_err() {
                    return v;
                }
                let close = self.lexer.peek();
                if close.kind != RParen {
                    return self.unexpected(close);
                }
                self.lexer.advance();
                v
            }
            LBrace => self.object_literal(),
            Eof => self.throw("unexpected end of input"),
            Error => self.throw("parse error"),
            _ => self.unexpected(t),
        }
    }

    fn identifier(&mut self, t: Token) -> Value {
        if self.flags & F_NOEXEC != 0 {
            return Value::UNDEFINED;
        }
        let name = self.lexer.token_bytes(t).to_vec();
        match self.arena.resolve(self.scope.offset(), &name) {
            Some((owner, p)) => {
                self.lvalue_owner = owner;
                Value::new(Type::Property, p as u64)
            }
            None => {
                let msg = format!("'{}' not found", String::from_utf8_lossy(&name));
                self.throw(&msg)
            }
        }
    }

    /// A function literal is stored as its verbatim `(params){body}` text;
    /// nothing is compiled until the call. The body is scanned now so
    /// syntax errors surface at the definition.
    fn function_literal(&mut self) -> Value {
        self.lexer.advance(); // function
        let open = self.lexer.peek();
        if open.kind != TokenKind::LParen {
            return self.unexpected(open);
        }
        let start = open.off;
        self.lexer.advance();
        loop {
            let t = self.lexer.peek();
            match t.kind {
                TokenKind::RParen => {
                    self.lexer.advance();
                    break;
                }
                TokenKind::Ident => {
                    self.lexer.advance();
                    let sep = self.lexer.peek();
                    match sep.kind {
                        TokenKind::Comma => {
                            self.lexer.advance();
                        }
                        TokenKind::RParen => {}
                        _ => return self.unexpected(sep),
                    }
                }
                _ => return self.unexpected(t),
            }
        }
        let brace = self.lexer.peek();
        if brace.kind != TokenKind::LBrace {
            return self.unexpected(brace);
        }
        let scanned = self.with_noexec(Self::block);
        if scanned.is_err() {
            return scanned;
        }
        let end = self.lexer.last_end();
        if self.flags & F_NOEXEC != 0 {
            return Value::UNDEFINED;
        }
        let text = self.lexer.source()[start as usize..end as usize].to_vec();
        match self.arena.create_string(&text) {
            Some(s) => Value::function(s),
            None => self.oom(),
        }
    }

    fn object_literal(&mut self) -> Value {
        self.lexer.advance(); // {
        let exec = self.flags & F_NOEXEC == 0;
        let obj = if exec {
            match self.arena.create_object(0) {
                Some(o) => o,
                None => return self.oom(),
            }
        } else {
            0
        };
        loop {
            let t = self.lexer.peek();
            match t.kind {
                TokenKind::RBrace => {
                    self.lexer.advance();
                    break;
                }
                TokenKind::Ident | TokenKind::Str => {
                    self.lexer.advance();
                    let key = if t.kind == TokenKind::Str {
                        unescape(self.lexer.token_bytes(t))
                    } else {
                        self.lexer.token_bytes(t).to_vec()
                    };
                    let colon = self.lexer.peek();
                    if colon.kind != TokenKind::Colon {
                        return self.unexpected(colon);
                    }
                    self.lexer.advance();
                    let v = self.assignment();
                    if v.is_err() {
                        return v;
                    }
                    if exec {
                        let v = self.arena.deref_property(v);
                        if self.arena.set_property(obj, &key, v).is_none() {
                            return self.oom();
                        }
                    }
                    let sep = self.lexer.peek();
                    match sep.kind {
                        TokenKind::Comma => {
                            self.lexer.advance();
                        }
                        TokenKind::RBrace => {}
                        _ => return self.unexpected(sep),
                    }
                }
                _ => return self.unexpected(t),
            }
        }
        if exec {
            Value::new(Type::Object, obj as u64)
        } else {
            Value::UNDEFINED
        }
    }

    // ---- operator semantics ----

    fn binary_op(&mut self, op: TokenKind, lhs: Value, rhs: Value) -> Value {
        use TokenKind::*;
        if self.flags & F_NOEXEC != 0 {
            return Value::UNDEFINED;
        }
        let l = self.arena.deref_property(lhs);
        let r = self.arena.deref_property(rhs);

        if op == Plus && l.type_of() == Type::String && r.type_of() == Type::String {
            let mut bytes = self.arena.string_bytes(l.offset()).to_vec();
            bytes.extend_from_slice(self.arena.string_bytes(r.offset()));
            return self.make_string(&bytes);
        }
        match op {
            EqEq | EqEqEq => return Value::boolean(self.strict_eq(l, r)),
            BangEq | BangEqEq => return Value::boolean(!self.strict_eq(l, r)),
            _ => {}
        }
        if l.type_of() != Type::Number || r.type_of() != Type::Number {
            return self.throw("bad operands");
        }
        let (a, b) = (l.as_number(), r.as_number());
        match op {
            Plus => Value::number(a + b),
            Minus => Value::number(a - b),
            Star => Value::number(a * b),
            Slash => Value::number(a / b),
            Percent => Value::number(a % b),
            StarStar => Value::number(a.powf(b)),
            Lt => Value::boolean(a < b),
            LtEq => Value::boolean(a <= b),
            Gt => Value::boolean(a > b),
            GtEq => Value::boolean(a >= b),
            LtLt => Value::number((to_int32(a) << (to_int32(b) as u32 & 31)) as f64),
            GtGt => Value::number((to_int32(a) >> (to_int32(b) as u32 & 31)) as f64),
            GtGtGt => Value::number(((to_int32(a) as u32) >> (to_int32(b) as u32 & 31)) as f64),
            Amp => Value::number((to_int32(a) & to_int32(b)) as f64),
            Pipe => Value::number((to_int32(a) | to_int32(b)) as f64),
            Caret => Value::number((to_int32(a) ^ to_int32(b)) as f64),
            _ => self.throw("bad operands"),
        }
    }

    /// `==` and `===` are both strict: no coercion anywhere in the
    /// language. Strings compare by content, references by identity.
    fn strict_eq(&self, l: Value, r: Value) -> bool {
        match (l.type_of(), r.type_of()) {
            (Type::Number, Type::Number) => l.as_number() == r.as_number(),
            (Type::String, Type::String) => {
                l.offset() == r.offset()
                    || self.arena.string_bytes(l.offset()) == self.arena.string_bytes(r.offset())
            }
            (a, b) if a == b => l.bits() == r.bits(),
            _ => false,
        }
    }

    fn truthy_value(&self, v: Value) -> bool {
        let v = self.arena.deref_property(v);
        match v.type_of() {
            Type::Boolean => v.as_boolean(),
            Type::Number => {
                let d = v.as_number();
                d != 0.0 && !d.is_nan()
            }
            Type::String => !self.arena.string_bytes(v.offset()).is_empty(),
            Type::Undefined | Type::Null | Type::Error => false,
            _ => true,
        }
    }

    fn make_string(&mut self, bytes: &[u8]) -> Value {
        match self.arena.create_string(bytes) {
            Some(s) => Value::new(Type::String, s as u64),
            None => self.oom(),
        }
    }

    fn oom(&mut self) -> Value {
        self.throw("out of memory")
    }

    fn unexpected(&mut self, t: Token) -> Value {
        if t.kind == TokenKind::Eof {
            return self.throw("unexpected end of input");
        }
        let lexeme = String::from_utf8_lossy(self.lexer.token_bytes(t)).into_owned();
        self.throw(&format!("unexpected token '{lexeme}'"))
    }
}
