//! Single-pass Pratt compiler: parses and emits bytecode in the same
//! walk, with no intermediate AST or IR.
//!
//! Nested function compilers are kept as a `Vec<FunctionState>` rather
//! than a recursive `enclosing: Box<..>` chain, so `resolve_local` /
//! `resolve_upvalue` walk the stack by index instead of recursing through
//! owned pointers.

use crate::common::object::{FunctionObj, LoxFunction, StringObj};
use crate::common::opcode::OpCode;
use crate::common::value::Value;
use crate::compiler::precedence::{infix_precedence, Precedence};
use crate::compiler::scanner::Scanner;
use crate::compiler::token::{Token, TokenKind};
use crate::vm::error::CompileError;
use crate::vm::heap::Heap;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: Token<'src>,
    /// `-1` means declared but not yet initialized (its own initializer
    /// expression is still being compiled).
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueRef {
    index: u8,
    is_local: bool,
}

struct FunctionState<'src> {
    function: LoxFunction,
    fn_type: FunctionType,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    upvalues: Vec<UpvalueRef>,
}

impl<'src> FunctionState<'src> {
    fn new(fn_type: FunctionType, name: Option<*mut StringObj>) -> Self {
        // Slot 0 is reserved: the receiver for methods/initializers, an
        // unnameable placeholder otherwise (mirrors the book's "" local).
        let slot0_name = match fn_type {
            FunctionType::Method | FunctionType::Initializer => "this",
            FunctionType::Function | FunctionType::Script => "",
        };
        Self {
            function: LoxFunction::new(name),
            fn_type,
            locals: vec![Local {
                name: Token {
                    kind: TokenKind::Identifier,
                    lexeme: slot0_name,
                    line: 0,
                },
                depth: 0,
                is_captured: false,
            }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    functions: Vec<FunctionState<'src>>,
    classes: Vec<ClassState>,
}

/// Compiles `source` into the top-level script function. On failure,
/// returns every diagnostic collected during error recovery, not just the
/// first.
pub fn compile(source: &str, heap: &mut Heap) -> Result<*mut FunctionObj, Vec<CompileError>> {
    let mut compiler = Compiler::new(source);
    compiler.functions.push(FunctionState::new(FunctionType::Script, None));
    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration(heap);
    }
    compiler.consume(TokenKind::Eof, "Expect end of expression.");
    let (function_ptr, _upvalues) = compiler.end_function(heap);
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(function_ptr)
    }
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str) -> Self {
        let sentinel = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 0,
        };
        Self {
            scanner: Scanner::new(source),
            previous: sentinel,
            current: sentinel,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
        }
    }

    // -- Token stream ----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let lexeme = match token.kind {
            TokenKind::Eof => None,
            TokenKind::Error => Some(String::new()),
            _ => Some(token.lexeme.to_string()),
        };
        self.errors.push(CompileError {
            line: token.line,
            lexeme,
            message: message.to_string(),
        });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -- Bytecode emission -------------------------------------------------

    fn current_chunk(&mut self) -> &mut crate::common::chunk::Chunk {
        &mut self
            .functions
            .last_mut()
            .expect("at least the script's FunctionState is always on the stack")
            .function
            .chunk
    }

    fn emit(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.current_chunk().write(op, line);
    }

    fn emit_return(&mut self) {
        let fn_type = self.functions.last().unwrap().fn_type;
        if fn_type == FunctionType::Initializer {
            self.emit(OpCode::GetLocal(0));
        } else {
            self.emit(OpCode::Nil);
        }
        self.emit(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit(OpCode::Constant(idx));
    }

    fn emit_jump_if_false(&mut self) -> usize {
        self.emit(OpCode::JumpIfFalse(0));
        self.current_chunk().len() - 1
    }

    fn emit_jump(&mut self) -> usize {
        self.emit(OpCode::Jump(0));
        self.current_chunk().len() - 1
    }

    fn patch_jump(&mut self, index: usize) {
        let target = self.current_chunk().len();
        if target > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        match &mut self.current_chunk().code[index] {
            OpCode::Jump(t) | OpCode::JumpIfFalse(t) => *t = target as u16,
            _ => unreachable!("patch_jump called on a non-jump instruction"),
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        if loop_start > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit(OpCode::Loop(loop_start as u16));
    }

    fn identifier_constant(&mut self, name: &str, heap: &mut Heap) -> u8 {
        match heap.intern_string(name) {
            Ok(ptr) => self.make_constant(Value::String(ptr)),
            Err(_) => {
                self.error("Out of memory while interning identifier.");
                0
            }
        }
    }

    // -- Scopes and locals -------------------------------------------------

    fn begin_scope(&mut self) {
        self.functions.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth;
        let mut to_close = Vec::new();
        {
            let fstate = self.functions.last_mut().unwrap();
            fstate.scope_depth -= 1;
            depth = fstate.scope_depth;
            while let Some(local) = fstate.locals.last() {
                if local.depth <= depth {
                    break;
                }
                to_close.push(fstate.locals.pop().unwrap().is_captured);
            }
        }
        for captured in to_close {
            if captured {
                self.emit(OpCode::CloseUpvalue);
            } else {
                self.emit(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: Token<'src>) {
        let too_many = self.functions.last().unwrap().locals.len() >= u8::MAX as usize + 1;
        if too_many {
            self.error("Too many local variables in function.");
            return;
        }
        self.functions.last_mut().unwrap().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        let scope_depth = self.functions.last().unwrap().scope_depth;
        if scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let mut conflict = false;
        {
            let fstate = self.functions.last().unwrap();
            for local in fstate.locals.iter().rev() {
                if local.depth != -1 && local.depth < scope_depth {
                    break;
                }
                if local.name.lexeme == name.lexeme {
                    conflict = true;
                    break;
                }
            }
        }
        if conflict {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        let fstate = self.functions.last_mut().unwrap();
        if fstate.scope_depth == 0 {
            return;
        }
        let depth = fstate.scope_depth;
        if let Some(local) = fstate.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn parse_variable(&mut self, message: &str, heap: &mut Heap) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.functions.last().unwrap().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.to_string();
        self.identifier_constant(&name, heap)
    }

    fn define_variable(&mut self, global: u8) {
        if self.functions.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(OpCode::DefineGlobal(global));
    }

    fn resolve_local(&mut self, fn_index: usize, name: &str) -> Option<u8> {
        let fstate = &self.functions[fn_index];
        for (i, local) in fstate.locals.iter().enumerate().rev() {
            if local.name.lexeme == name {
                if local.depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, fn_index: usize, name: &str) -> Option<u8> {
        if fn_index == 0 {
            return None;
        }
        let enclosing = fn_index - 1;
        if let Some(local_idx) = self.resolve_local(enclosing, name) {
            self.functions[enclosing].locals[local_idx as usize].is_captured = true;
            return Some(self.add_upvalue(fn_index, local_idx, true));
        }
        if let Some(upvalue_idx) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(fn_index, upvalue_idx, false));
        }
        None
    }

    fn add_upvalue(&mut self, fn_index: usize, index: u8, is_local: bool) -> u8 {
        {
            let fstate = &self.functions[fn_index];
            for (i, existing) in fstate.upvalues.iter().enumerate() {
                if existing.index == index && existing.is_local == is_local {
                    return i as u8;
                }
            }
        }
        let too_many = self.functions[fn_index].upvalues.len() >= u8::MAX as usize + 1;
        if too_many {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let fstate = &mut self.functions[fn_index];
        fstate.upvalues.push(UpvalueRef { index, is_local });
        let count = fstate.upvalues.len() as u8;
        fstate.function.upvalue_count = count;
        count - 1
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool, heap: &mut Heap) {
        let fn_index = self.functions.len() - 1;
        let (get_op, set_op, arg): (fn(u8) -> OpCode, fn(u8) -> OpCode, u8) =
            if let Some(slot) = self.resolve_local(fn_index, name.lexeme) {
                (OpCode::GetLocal, OpCode::SetLocal, slot)
            } else if let Some(slot) = self.resolve_upvalue(fn_index, name.lexeme) {
                (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
            } else {
                let idx = self.identifier_constant(name.lexeme, heap);
                (OpCode::GetGlobal, OpCode::SetGlobal, idx)
            };
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression(heap);
            self.emit(set_op(arg));
        } else {
            self.emit(get_op(arg));
        }
    }

    // -- Functions -----------------------------------------------------

    fn end_function(&mut self, heap: &mut Heap) -> (*mut FunctionObj, Vec<UpvalueRef>) {
        self.emit_return();
        let fstate = self.functions.pop().unwrap();
        let ptr = heap
            .alloc_function(fstate.function)
            .unwrap_or_else(|_| panic!("out of memory while compiling"));
        (ptr, fstate.upvalues)
    }

    fn function(&mut self, fn_type: FunctionType, heap: &mut Heap) {
        let name_lexeme = self.previous.lexeme.to_string();
        let name_ptr = match heap.intern_string(&name_lexeme) {
            Ok(ptr) => Some(ptr),
            Err(_) => {
                self.error("Out of memory while interning function name.");
                None
            }
        };
        self.functions.push(FunctionState::new(fn_type, name_ptr));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let too_many = self.functions.last().unwrap().function.arity >= 255;
                if too_many {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.functions.last_mut().unwrap().function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.", heap);
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block(heap);

        let (function_ptr, upvalues) = self.end_function(heap);
        let const_idx = self.make_constant(Value::Function(function_ptr));
        let upvalue_spec: Vec<(bool, u8)> = upvalues.iter().map(|u| (u.is_local, u.index)).collect();
        self.emit(OpCode::Closure(const_idx, upvalue_spec));
    }

    fn fun_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("Expect function name.", heap);
        self.mark_initialized();
        self.function(FunctionType::Function, heap);
        self.define_variable(global);
    }

    fn method(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_lexeme = self.previous.lexeme;
        let fn_type = if name_lexeme == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        let name_idx = self.identifier_constant(name_lexeme, heap);
        self.function(fn_type, heap);
        self.emit(OpCode::Method(name_idx));
    }

    fn class_declaration(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_idx = self.identifier_constant(class_name.lexeme, heap);
        self.declare_variable();

        self.emit(OpCode::Class(name_idx));
        self.define_variable(name_idx);

        self.classes.push(ClassState { has_superclass: false });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false, heap);
            if self.previous.lexeme == class_name.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.define_variable(0);

            self.named_variable(class_name, false, heap);
            self.emit(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false, heap);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method(heap);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    // -- Statements ------------------------------------------------------

    fn declaration(&mut self, heap: &mut Heap) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration(heap);
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration(heap);
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(heap);
        } else {
            self.statement(heap);
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("Expect variable name.", heap);
        if self.match_token(TokenKind::Equal) {
            self.expression(heap);
        } else {
            self.emit(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self, heap: &mut Heap) {
        if self.match_token(TokenKind::Print) {
            self.print_statement(heap);
        } else if self.match_token(TokenKind::If) {
            self.if_statement(heap);
        } else if self.match_token(TokenKind::Return) {
            self.return_statement(heap);
        } else if self.match_token(TokenKind::While) {
            self.while_statement(heap);
        } else if self.match_token(TokenKind::For) {
            self.for_statement(heap);
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block(heap);
            self.end_scope();
        } else {
            self.expression_statement(heap);
        }
    }

    fn block(&mut self, heap: &mut Heap) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration(heap);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(OpCode::Print);
    }

    fn expression_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(OpCode::Pop);
    }

    fn if_statement(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump_if_false();
        self.emit(OpCode::Pop);
        self.statement(heap);

        let else_jump = self.emit_jump();
        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement(heap);
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self, heap: &mut Heap) {
        let loop_start = self.current_chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump_if_false();
        self.emit(OpCode::Pop);
        self.statement(heap);
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop);
    }

    fn for_statement(&mut self, heap: &mut Heap) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer clause.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration(heap);
        } else {
            self.expression_statement(heap);
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump_if_false());
            self.emit(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump();
            let increment_start = self.current_chunk().len();
            self.expression(heap);
            self.emit(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement(heap);
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self, heap: &mut Heap) {
        let fn_type = self.functions.last().unwrap().fn_type;
        if fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(OpCode::Return);
        }
    }

    // -- Expressions (Pratt parser) -----------------------------------

    fn expression(&mut self, heap: &mut Heap) {
        self.parse_precedence(Precedence::Assignment, heap);
    }

    fn parse_precedence(&mut self, precedence: Precedence, heap: &mut Heap) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        let prefix_kind = self.previous.kind;
        self.prefix(prefix_kind, can_assign, heap);

        while infix_precedence(self.current.kind) >= precedence {
            self.advance();
            let infix_kind = self.previous.kind;
            self.infix(infix_kind, can_assign, heap);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool, heap: &mut Heap) {
        match kind {
            TokenKind::LeftParen => self.grouping(heap),
            TokenKind::Minus | TokenKind::Bang => self.unary(heap),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(heap),
            TokenKind::True | TokenKind::False | TokenKind::Nil => self.literal(kind),
            TokenKind::Identifier => self.variable(can_assign, heap),
            TokenKind::This => self.this_expr(heap),
            TokenKind::Super => self.super_expr(heap),
            _ => self.error("Expect expression."),
        }
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool, heap: &mut Heap) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(kind, heap),
            TokenKind::And => self.and_expr(heap),
            TokenKind::Or => self.or_expr(heap),
            TokenKind::LeftParen => self.call_expr(heap),
            TokenKind::Dot => self.dot(can_assign, heap),
            _ => {}
        }
    }

    fn number(&mut self) {
        let value = self.previous.lexeme.parse::<f64>().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, heap: &mut Heap) {
        let lexeme = self.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        match heap.intern_string(content) {
            Ok(ptr) => self.emit_constant(Value::String(ptr)),
            Err(_) => self.error("Out of memory while interning string literal."),
        }
    }

    fn literal(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::True => self.emit(OpCode::True),
            TokenKind::False => self.emit(OpCode::False),
            TokenKind::Nil => self.emit(OpCode::Nil),
            _ => unreachable!("literal() only ever called for true/false/nil"),
        }
    }

    fn grouping(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, heap: &mut Heap) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary, heap);
        match op_kind {
            TokenKind::Minus => self.emit(OpCode::Negate),
            TokenKind::Bang => self.emit(OpCode::Not),
            _ => unreachable!("unary() only ever called for '-' or '!'"),
        }
    }

    fn binary(&mut self, kind: TokenKind, heap: &mut Heap) {
        let next_prec = infix_precedence(kind).next();
        self.parse_precedence(next_prec, heap);
        match kind {
            TokenKind::Plus => self.emit(OpCode::Add),
            TokenKind::Minus => self.emit(OpCode::Subtract),
            TokenKind::Star => self.emit(OpCode::Multiply),
            TokenKind::Slash => self.emit(OpCode::Divide),
            TokenKind::EqualEqual => self.emit(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit(OpCode::Equal);
                self.emit(OpCode::Not);
            }
            TokenKind::Greater => self.emit(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit(OpCode::Less);
                self.emit(OpCode::Not);
            }
            TokenKind::Less => self.emit(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit(OpCode::Greater);
                self.emit(OpCode::Not);
            }
            _ => unreachable!("binary() only ever called for a binary operator token"),
        }
    }

    fn and_expr(&mut self, heap: &mut Heap) {
        let end_jump = self.emit_jump_if_false();
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And, heap);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self, heap: &mut Heap) {
        let else_jump = self.emit_jump_if_false();
        let end_jump = self.emit_jump();
        self.patch_jump(else_jump);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or, heap);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool, heap: &mut Heap) {
        let name = self.previous;
        self.named_variable(name, can_assign, heap);
    }

    fn this_expr(&mut self, heap: &mut Heap) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let name = self.previous;
        self.named_variable(name, false, heap);
    }

    fn super_expr(&mut self, heap: &mut Heap) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method_name = self.previous.lexeme.to_string();
        let name_idx = self.identifier_constant(&method_name, heap);

        self.named_variable(Token::synthetic("this"), false, heap);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list(heap);
            self.named_variable(Token::synthetic("super"), false, heap);
            self.emit(OpCode::SuperInvoke(name_idx, arg_count));
        } else {
            self.named_variable(Token::synthetic("super"), false, heap);
            self.emit(OpCode::GetSuper(name_idx));
        }
    }

    fn call_expr(&mut self, heap: &mut Heap) {
        let arg_count = self.argument_list(heap);
        self.emit(OpCode::Call(arg_count));
    }

    fn argument_list(&mut self, heap: &mut Heap) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression(heap);
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn dot(&mut self, can_assign: bool, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name_lexeme = self.previous.lexeme.to_string();
        let name_idx = self.identifier_constant(&name_lexeme, heap);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression(heap);
            self.emit(OpCode::SetProperty(name_idx));
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list(heap);
            self.emit(OpCode::Invoke(name_idx, arg_count));
        } else {
            self.emit(OpCode::GetProperty(name_idx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn fresh_heap() -> Heap {
        Heap::new(&Config::default())
    }

    #[test]
    fn every_compiled_chunk_ends_in_nil_then_return() {
        let mut heap = fresh_heap();
        let function = compile("print 1;", &mut heap).unwrap();
        let chunk = unsafe { &(*function).data.chunk };
        let tail = &chunk.code[chunk.code.len() - 2..];
        assert!(matches!(tail[0], OpCode::Nil));
        assert!(matches!(tail[1], OpCode::Return));
    }

    #[test]
    fn redeclaring_a_local_in_the_same_scope_is_a_compile_error() {
        let mut heap = fresh_heap();
        let errors = compile("{ var a = 1; var a = 2; }", &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Already a variable with this name in this scope.")));
    }

    #[test]
    fn returning_a_value_from_an_initializer_is_a_compile_error() {
        let mut heap = fresh_heap();
        let source = "class C { init() { return 1; } }";
        let errors = compile(source, &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Can't return a value from an initializer.")));
    }

    #[test]
    fn returning_from_top_level_code_is_a_compile_error() {
        let mut heap = fresh_heap();
        let errors = compile("return 1;", &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Can't return from top-level code.")));
    }

    #[test]
    fn using_this_outside_a_class_is_a_compile_error() {
        let mut heap = fresh_heap();
        let errors = compile("print this;", &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Can't use 'this' outside of a class.")));
    }

    #[test]
    fn using_super_without_a_superclass_is_a_compile_error() {
        let mut heap = fresh_heap();
        let source = "class A { speak() { super.speak(); } }";
        let errors = compile(source, &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Can't use 'super' in a class with no superclass.")));
    }

    #[test]
    fn a_class_inheriting_from_itself_is_a_compile_error() {
        let mut heap = fresh_heap();
        let errors = compile("class A < A {}", &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("A class can't inherit from itself.")));
    }

    #[test]
    fn an_unterminated_string_is_a_compile_error() {
        let mut heap = fresh_heap();
        let errors = compile("print \"abc;", &mut heap).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("Unterminated string.")));
    }

    #[test]
    fn an_unterminated_block_comment_is_a_compile_error() {
        let mut heap = fresh_heap();
        let errors = compile("/* never closed", &mut heap).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("Unterminated block comment.")));
    }

    #[test]
    fn a_loop_target_past_the_jump_limit_is_a_compile_error() {
        let mut heap = fresh_heap();
        let filler = "a = a + 1;\n".repeat(70_000);
        let source = format!("var a = 0; {filler} while (a < 0) {{ a = a + 1; }}");
        let errors = compile(&source, &mut heap).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("Loop body too large.")));
    }

    #[test]
    fn well_formed_programs_compile_without_errors() {
        let mut heap = fresh_heap();
        let source = r#"
            class Animal {
              init(name) { this.name = name; }
              speak() { print this.name; }
            }
            class Dog < Animal {
              speak() { super.speak(); print "woof"; }
            }
            var d = Dog("Rex");
            d.speak();
        "#;
        assert!(compile(source, &mut heap).is_ok());
    }
}
