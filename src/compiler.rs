// File: src/compiler.rs
//
// A single-pass, Pratt-style compiler: source text goes straight to bytecode,
// with no intermediate AST (§4.2). Each grammar rule both parses its tokens
// and emits the instructions for them in the same recursive-descent call.

use crate::chunk::{Chunk, Instruction, JumpTarget, UpvalueCapture};
use crate::gc::ObjRef;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::object::{Obj, ObjFunction};
use crate::value::Value;
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

type ParseFn<'src, 'vm> = fn(&mut Compiler<'src, 'vm>, bool);

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    depth: i32, // -1 while its own initializer is still being compiled
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    is_local: bool,
    index: u8,
}

struct FunctionState {
    function: ObjRef,
    function_type: FunctionType,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
}

/// Drives one compile: owns the scanner, the current/previous token pair,
/// and a stack of in-progress `FunctionState`s mirroring the enclosing-
/// compiler chain a nested `fun`/method body walks back through to resolve
/// upvalues (§4.2).
struct Compiler<'src, 'vm> {
    vm: &'vm mut Vm,
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    states: Vec<FunctionState>,
    errors: Vec<String>,
    class_depth: usize,
}

/// Compiles `source` into a top-level script function. Returns `None` if any
/// compile error was reported (collected rather than short-circuited — the
/// scanner keeps going after an error via `synchronize`, per §4.2).
pub fn compile(vm: &mut Vm, source: &str) -> Option<ObjRef> {
    let function_ref = vm.alloc(Obj::Function(ObjFunction::new()));
    vm.compiler_roots.push(function_ref);

    let mut compiler = Compiler {
        vm,
        scanner: Scanner::new(source),
        current: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
        previous: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
        had_error: false,
        panic_mode: false,
        states: vec![FunctionState {
            function: function_ref,
            function_type: FunctionType::Script,
            locals: vec![Local { name: String::new(), depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }],
        errors: Vec::new(),
        class_depth: 0,
    };

    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }

    let had_error = compiler.had_error;
    let errors = std::mem::take(&mut compiler.errors);
    let result_ref = compiler.end_compiler();

    for message in &errors {
        crate::errors::report_compile_error(message);
    }
    compiler.vm.diagnostics = errors;

    if had_error {
        None
    } else {
        Some(result_ref)
    }
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    // ---- token stream -----------------------------------------------

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

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
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
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors.push(format!("[line {}] Error{}: {}", token.line, location, message));
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

    // ---- emission ---------------------------------------------------

    fn current_chunk(&mut self) -> &mut Chunk {
        let function_ref = self.states.last().unwrap().function;
        &mut self.vm.heap.get_mut(function_ref).as_function_mut().unwrap().chunk
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        let line = self.previous.line;
        self.current_chunk().write(instruction, line)
    }

    fn emit_return(&mut self) {
        if self.states.last().unwrap().function_type == FunctionType::Initializer {
            self.emit(Instruction::GetLocal(0));
        } else {
            self.emit(Instruction::Nil);
        }
        self.emit(Instruction::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.current_chunk().add_constant(value) {
            Ok(index) => index,
            Err(message) => {
                self.error(message);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit(Instruction::Constant(constant));
    }

    /// Interns `name` (possibly allocating) and stores the resulting handle
    /// in the constant pool in the same breath — no other allocation runs
    /// between the two, so the freshly interned string never needs a
    /// temporary GC root of its own (§4.6).
    fn identifier_constant(&mut self, name: &str) -> u8 {
        let ptr = self.vm.intern_string(name);
        self.make_constant(Value::Obj(ptr))
    }

    fn emit_jump_if_false(&mut self) -> usize {
        self.emit(Instruction::JumpIfFalse(JumpTarget(usize::MAX)))
    }

    fn emit_jump(&mut self) -> usize {
        self.emit(Instruction::Jump(JumpTarget(usize::MAX)))
    }

    fn patch_jump(&mut self, offset: usize) {
        let target = self.current_chunk().code.len();
        match &mut self.current_chunk().code[offset] {
            Instruction::Jump(t) | Instruction::JumpIfFalse(t) => *t = JumpTarget(target),
            _ => unreachable!("patch_jump called on a non-jump instruction"),
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        // There's no literal byte count to bound in an enum-based chunk;
        // instruction count stands in for it (§8's "loop body too large").
        if self.current_chunk().code.len() - loop_start > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit(Instruction::Loop(JumpTarget(loop_start)));
    }

    // ---- scopes & locals ----------------------------------------------

    fn begin_scope(&mut self) {
        self.states.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let scope_depth = {
            let state = self.states.last_mut().unwrap();
            state.scope_depth -= 1;
            state.scope_depth
        };
        loop {
            let should_pop = matches!(
                self.states.last().unwrap().locals.last(),
                Some(local) if local.depth > scope_depth
            );
            if !should_pop {
                break;
            }
            let is_captured = self.states.last_mut().unwrap().locals.pop().unwrap().is_captured;
            if is_captured {
                self.emit(Instruction::CloseUpvalue);
            } else {
                self.emit(Instruction::Pop);
            }
        }
    }

    fn add_local(&mut self, name: String) {
        let state = self.states.last_mut().unwrap();
        if state.locals.len() >= 256 {
            self.error("Too many local variables in function.");
            return;
        }
        state.locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.states.last().unwrap().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.to_string();
        let scope_depth = self.states.last().unwrap().scope_depth;
        let mut duplicate = false;
        for local in self.states.last().unwrap().locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        let state = self.states.last_mut().unwrap();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        let last = state.locals.len() - 1;
        state.locals[last].depth = depth;
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.states.last().unwrap().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn define_variable(&mut self, global: u8) {
        if self.states.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(Instruction::DefineGlobal(global));
    }

    fn resolve_local(&mut self, state_index: usize, name: &str) -> Option<u8> {
        let state = &self.states[state_index];
        for (i, local) in state.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, state_index: usize, name: &str) -> Option<u8> {
        if state_index == 0 {
            return None;
        }
        let enclosing = state_index - 1;
        if let Some(local_slot) = self.resolve_local(enclosing, name) {
            self.states[enclosing].locals[local_slot as usize].is_captured = true;
            return Some(self.add_upvalue(state_index, true, local_slot));
        }
        if let Some(upvalue_slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(state_index, false, upvalue_slot));
        }
        None
    }

    fn add_upvalue(&mut self, state_index: usize, is_local: bool, index: u8) -> u8 {
        {
            let state = &self.states[state_index];
            for (i, uv) in state.upvalues.iter().enumerate() {
                if uv.is_local == is_local && uv.index == index {
                    return i as u8;
                }
            }
        }
        if self.states[state_index].upvalues.len() >= 256 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.states[state_index].upvalues.push(UpvalueDesc { is_local, index });
        let count = self.states[state_index].upvalues.len() as u8;
        let function_ref = self.states[state_index].function;
        self.vm.heap.get_mut(function_ref).as_function_mut().unwrap().upvalue_count = count;
        count - 1
    }

    // ---- declarations & statements --------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name_token = self.previous;
        let name_constant = self.identifier_constant(class_name_token.lexeme);
        self.declare_variable();

        self.emit(Instruction::Class(name_constant));
        self.define_variable(name_constant);

        self.class_depth += 1;
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        self.named_variable(class_name_token, false);

        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(Instruction::Pop); // drop the class value pushed above
        self.class_depth -= 1;
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_token = self.previous;
        let constant = self.identifier_constant(name_token.lexeme);

        let function_type = if name_token.lexeme == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type, name_token.lexeme);
        self.emit(Instruction::Method(constant));
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        let name = self.previous.lexeme;
        self.mark_initialized();
        self.function(FunctionType::Function, name);
        self.define_variable(global);
    }

    /// Compiles a function (or method/initializer) body as a nested
    /// `FunctionState`, then wraps the finished `ObjFunction` constant in an
    /// `OP_CLOSURE` back in the *enclosing* state (§4.2, §4.5).
    fn function(&mut self, function_type: FunctionType, name: &str) {
        let name_ref = self.vm.intern_string(name);
        self.vm.stack.push(Value::Obj(name_ref)); // protect across the alloc below
        let function_ref = self.vm.alloc(Obj::Function(ObjFunction {
            name: Some(name_ref),
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
        }));
        self.vm.stack.pop();
        self.vm.compiler_roots.push(function_ref);

        let this_name = if matches!(function_type, FunctionType::Method | FunctionType::Initializer) {
            "this"
        } else {
            ""
        };
        self.states.push(FunctionState {
            function: function_ref,
            function_type,
            locals: vec![Local { name: this_name.to_string(), depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
        });

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                {
                    let arity = self.vm.heap.get(function_ref).as_function().unwrap().arity;
                    if arity == 255 {
                        self.error("Can't have more than 255 parameters.");
                    }
                    self.vm.heap.get_mut(function_ref).as_function_mut().unwrap().arity = arity.wrapping_add(1);
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let upvalues: Vec<UpvalueDesc> = self.states.last().unwrap().upvalues.clone();
        let finished_ref = self.end_compiler();
        debug_assert_eq!(finished_ref, function_ref);

        let constant = self.make_constant(Value::Obj(function_ref));
        let captures = upvalues
            .into_iter()
            .map(|uv| UpvalueCapture { is_local: uv.is_local, index: uv.index })
            .collect();
        self.emit(Instruction::Closure(constant, captures));
    }

    fn end_compiler(&mut self) -> ObjRef {
        self.emit_return();
        let state = self.states.pop().unwrap();
        self.vm.compiler_roots.pop();
        state.function
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(Instruction::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(Instruction::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(Instruction::Pop);
    }

    fn return_statement(&mut self) {
        if self.states.last().unwrap().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.states.last().unwrap().function_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(Instruction::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump_if_false();
        self.emit(Instruction::Pop);
        self.statement();

        let else_jump = self.emit_jump();
        self.patch_jump(then_jump);
        self.emit(Instruction::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump_if_false();
        self.emit(Instruction::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Instruction::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump_if_false());
            self.emit(Instruction::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump();
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit(Instruction::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(Instruction::Pop);
        }

        self.end_scope();
    }

    // ---- expressions ----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix_rule = match Self::get_rule(self.previous.kind).0 {
            Some(rule) => rule,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix_rule(self, can_assign);

        while precedence <= Self::get_rule(self.current.kind).2 {
            self.advance();
            let infix_rule = Self::get_rule(self.previous.kind).1.unwrap();
            infix_rule(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn get_rule(kind: TokenKind) -> (Option<ParseFn<'src, 'vm>>, Option<ParseFn<'src, 'vm>>, Precedence) {
        use TokenKind::*;
        match kind {
            LeftParen => (Some(Compiler::grouping), Some(Compiler::call), Precedence::Call),
            Dot => (None, Some(Compiler::dot), Precedence::Call),
            Minus => (Some(Compiler::unary), Some(Compiler::binary), Precedence::Term),
            Plus => (None, Some(Compiler::binary), Precedence::Term),
            Slash | Star => (None, Some(Compiler::binary), Precedence::Factor),
            Bang => (Some(Compiler::unary), None, Precedence::None),
            BangEqual | EqualEqual => (None, Some(Compiler::binary), Precedence::Equality),
            Greater | GreaterEqual | Less | LessEqual => (None, Some(Compiler::binary), Precedence::Comparison),
            Identifier => (Some(Compiler::variable), None, Precedence::None),
            String => (Some(Compiler::string_lit), None, Precedence::None),
            Number => (Some(Compiler::number), None, Precedence::None),
            And => (None, Some(Compiler::and_), Precedence::And),
            Or => (None, Some(Compiler::or_), Precedence::Or),
            False | Nil | True => (Some(Compiler::literal), None, Precedence::None),
            This => (Some(Compiler::this_), None, Precedence::None),
            _ => (None, None, Precedence::None),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit(Instruction::Not),
            TokenKind::Minus => self.emit(Instruction::Negate),
            _ => unreachable!(),
        };
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::get_rule(operator).2;
        self.parse_precedence(precedence.next());

        match operator {
            TokenKind::BangEqual => {
                self.emit(Instruction::Equal);
                self.emit(Instruction::Not);
            }
            TokenKind::EqualEqual => {
                self.emit(Instruction::Equal);
            }
            TokenKind::Greater => {
                self.emit(Instruction::Greater);
            }
            TokenKind::GreaterEqual => {
                self.emit(Instruction::Less);
                self.emit(Instruction::Not);
            }
            TokenKind::Less => {
                self.emit(Instruction::Less);
            }
            TokenKind::LessEqual => {
                self.emit(Instruction::Greater);
                self.emit(Instruction::Not);
            }
            TokenKind::Plus => {
                self.emit(Instruction::Add);
            }
            TokenKind::Minus => {
                self.emit(Instruction::Subtract);
            }
            TokenKind::Star => {
                self.emit(Instruction::Multiply);
            }
            TokenKind::Slash => {
                self.emit(Instruction::Divide);
            }
            _ => unreachable!(),
        };
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump_if_false();
        self.emit(Instruction::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump_if_false();
        let end_jump = self.emit_jump();
        self.patch_jump(else_jump);
        self.emit(Instruction::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string_lit(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let ptr = self.vm.intern_string(text);
        self.emit_constant(Value::Obj(ptr));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit(Instruction::False),
            TokenKind::Nil => self.emit(Instruction::Nil),
            TokenKind::True => self.emit(Instruction::True),
            _ => unreachable!(),
        };
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_depth == 0 {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let state_index = self.states.len() - 1;
        let get_op: fn(u8) -> Instruction;
        let set_op: fn(u8) -> Instruction;
        let arg: u8;

        if let Some(local) = self.resolve_local(state_index, name.lexeme) {
            arg = local;
            get_op = Instruction::GetLocal;
            set_op = Instruction::SetLocal;
        } else if let Some(upvalue) = self.resolve_upvalue(state_index, name.lexeme) {
            arg = upvalue;
            get_op = Instruction::GetUpvalue;
            set_op = Instruction::SetUpvalue;
        } else {
            arg = self.identifier_constant(name.lexeme);
            get_op = Instruction::GetGlobal;
            set_op = Instruction::SetGlobal;
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit(set_op(arg));
        } else {
            self.emit(get_op(arg));
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit(Instruction::Call(arg_count));
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name_constant = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit(Instruction::SetProperty(name_constant));
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit(Instruction::Invoke(name_constant, arg_count));
        } else {
            self.emit(Instruction::GetProperty(name_constant));
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
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
}
