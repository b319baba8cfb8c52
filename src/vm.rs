// File: src/vm.rs
//
// The virtual machine: a fixed-depth stack of call frames over a single
// operand stack, dispatching bytecode instructions one at a time (§4.5).
// Every allocation funnels through `Vm::alloc`, which is also the one place
// a collection can be triggered — see the per-call-site notes below for how
// each allocation keeps its operands rooted across that possibility (§4.6).

use crate::chunk::{Chunk, Instruction, UpvalueCapture};
use crate::gc::{Heap, ObjRef};
use crate::object::{
    fnv1a_hash, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjNative, ObjString,
    ObjUpvalue, UpvalueLocation,
};
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: ObjRef,
    ip: usize,
    /// Index into the operand stack where this frame's slot 0 lives.
    slot_base: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Where `print` sends its output. Defaults to the process's real stdout;
/// tests redirect it into a buffer so they can assert on exactly what a
/// program printed rather than just the pass/fail `InterpretResult` (§8).
enum OutputSink {
    Stdout,
    Buffer(String),
}

impl OutputSink {
    fn write_line(&mut self, text: &str) {
        match self {
            OutputSink::Stdout => println!("{}", text),
            OutputSink::Buffer(buf) => {
                buf.push_str(text);
                buf.push('\n');
            }
        }
    }
}

/// Owns the heap, the string-interning table, globals, and the live call
/// stack. A single `Vm` can run several `interpret` calls in a row (the REPL
/// does exactly this), resetting the operand stack and call frames each time
/// but keeping globals, the heap, and interned strings alive across calls.
pub struct Vm {
    pub(crate) heap: Heap,
    strings: Table,
    globals: Table,
    init_string: ObjRef,
    pub(crate) stack: Vec<Value>,
    frames: Vec<CallFrame>,
    open_upvalues: Vec<ObjRef>,
    pub(crate) compiler_roots: Vec<ObjRef>,
    pub trace: bool,
    output: OutputSink,
    /// Compile error messages (or the single runtime error message) from the
    /// most recent `interpret` call, for assertions and REPL diagnostics.
    pub(crate) diagnostics: Vec<String>,
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.allocate(Obj::String(ObjString::new("init".to_string())));
        let mut vm = Vm {
            heap,
            strings: Table::new(),
            globals: Table::new(),
            init_string,
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            compiler_roots: Vec::new(),
            trace: false,
            output: OutputSink::Stdout,
            diagnostics: Vec::new(),
        };
        vm.strings.set(init_string, Value::Nil, &vm.heap);
        crate::natives::install(&mut vm);
        vm
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Forces a collection on every growing allocation (§8: "Verifiable by
    /// running with stress-GC").
    pub fn set_stress_gc(&mut self, enabled: bool) {
        self.heap.stress_test = enabled;
    }

    /// Redirects `print` into an in-memory buffer instead of stdout.
    pub fn capture_output(&mut self) {
        self.output = OutputSink::Buffer(String::new());
    }

    /// Returns everything printed since the last `capture_output`/`take_output`
    /// call, leaving the buffer empty. Only meaningful after `capture_output`.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            OutputSink::Buffer(buf) => std::mem::take(buf),
            OutputSink::Stdout => String::new(),
        }
    }

    /// The compiler's error messages, or the single runtime error message,
    /// from the most recent `interpret` call.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Compiles and runs one program. Resets the operand stack and call
    /// frames (a fresh top-level call) but keeps globals/heap/interned
    /// strings from any prior call, so a REPL session accumulates state
    /// across lines the way the driver expects (§6).
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.diagnostics.clear();

        let function_ref = match crate::compiler::compile(self, source) {
            Some(f) => f,
            None => return InterpretResult::CompileError,
        };

        self.stack.push(Value::Obj(function_ref)); // protect across the closure alloc below
        let closure_ref = self.alloc(Obj::Closure(ObjClosure { function: function_ref, upvalues: Vec::new() }));
        self.stack.pop();
        self.stack.push(Value::Obj(closure_ref));
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, slot_base: 0 });

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(message) => {
                crate::errors::report_runtime_error(&message);
                self.diagnostics = vec![message];
                InterpretResult::RuntimeError
            }
        }
    }

    fn run(&mut self) -> Result<(), String> {
        loop {
            if self.trace {
                let ip = self.current_frame().ip;
                eprint!("{}", crate::debug::disassemble_instruction(self.current_chunk(), ip, &self.heap));
            }

            let instruction = self.current_instruction();
            self.advance_ip();

            match instruction {
                Instruction::Constant(idx) => {
                    let value = self.read_constant(idx);
                    self.stack.push(value);
                }
                Instruction::Nil => self.stack.push(Value::Nil),
                Instruction::True => self.stack.push(Value::Bool(true)),
                Instruction::False => self.stack.push(Value::Bool(false)),
                Instruction::Pop => {
                    self.stack.pop();
                }
                Instruction::GetLocal(slot) => {
                    let base = self.current_frame().slot_base;
                    self.stack.push(self.stack[base + slot as usize]);
                }
                Instruction::SetLocal(slot) => {
                    let base = self.current_frame().slot_base;
                    let value = *self.stack.last().unwrap();
                    self.stack[base + slot as usize] = value;
                }
                Instruction::GetGlobal(idx) => self.get_global(idx)?,
                Instruction::DefineGlobal(idx) => {
                    let name_ref = self.read_constant(idx).as_obj().unwrap();
                    let value = *self.stack.last().unwrap();
                    self.globals.set(name_ref, value, &self.heap);
                    self.stack.pop();
                }
                Instruction::SetGlobal(idx) => self.set_global(idx)?,
                Instruction::GetUpvalue(idx) => {
                    let upvalue_ref = self.current_closure_upvalue(idx);
                    let value = self.read_upvalue_value(upvalue_ref);
                    self.stack.push(value);
                }
                Instruction::SetUpvalue(idx) => {
                    let upvalue_ref = self.current_closure_upvalue(idx);
                    let value = *self.stack.last().unwrap();
                    self.write_upvalue_value(upvalue_ref, value);
                }
                Instruction::GetProperty(idx) => self.get_property(idx)?,
                Instruction::SetProperty(idx) => self.set_property(idx)?,
                Instruction::Equal => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(Value::values_equal(&a, &b)));
                }
                Instruction::Greater => self.binary_compare(|a, b| a > b)?,
                Instruction::Less => self.binary_compare(|a, b| a < b)?,
                Instruction::Add => self.add()?,
                Instruction::Subtract => self.binary_numeric(|a, b| a - b)?,
                Instruction::Multiply => self.binary_numeric(|a, b| a * b)?,
                Instruction::Divide => self.binary_numeric(|a, b| a / b)?,
                Instruction::Not => {
                    let value = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(value.is_falsey()));
                }
                Instruction::Negate => {
                    let value = *self.stack.last().unwrap();
                    match value.as_number() {
                        Some(n) => {
                            self.stack.pop();
                            self.stack.push(Value::Number(-n));
                        }
                        None => return Err(self.runtime_error("Operand must be a number.")),
                    }
                }
                Instruction::Print => {
                    let value = self.stack.pop().unwrap();
                    let text = value.format(&self.heap);
                    self.output.write_line(&text);
                }
                Instruction::Jump(target) => self.set_ip(target.0),
                Instruction::JumpIfFalse(target) => {
                    if self.stack.last().unwrap().is_falsey() {
                        self.set_ip(target.0);
                    }
                }
                Instruction::Loop(target) => self.set_ip(target.0),
                Instruction::Call(arg_count) => self.call_value(arg_count)?,
                Instruction::Closure(idx, captures) => self.make_closure(idx, &captures)?,
                Instruction::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.stack.pop();
                }
                Instruction::Return => {
                    if self.do_return()? {
                        return Ok(());
                    }
                }
                Instruction::Class(idx) => self.make_class(idx)?,
                Instruction::Method(idx) => self.define_method(idx)?,
                Instruction::Invoke(idx, arg_count) => self.invoke(idx, arg_count)?,
            }
        }
    }

    // ---- frame / chunk access -------------------------------------------

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().unwrap()
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().unwrap()
    }

    fn current_chunk(&self) -> &Chunk {
        let closure_ref = self.current_frame().closure;
        let function_ref = self.heap.get(closure_ref).as_closure().unwrap().function;
        &self.heap.get(function_ref).as_function().unwrap().chunk
    }

    fn current_instruction(&self) -> Instruction {
        let ip = self.current_frame().ip;
        self.current_chunk().code[ip].clone()
    }

    fn advance_ip(&mut self) {
        self.current_frame_mut().ip += 1;
    }

    fn set_ip(&mut self, target: usize) {
        self.current_frame_mut().ip = target;
    }

    fn read_constant(&self, idx: u8) -> Value {
        self.current_chunk().constants[idx as usize]
    }

    fn current_closure_upvalue(&self, idx: u8) -> ObjRef {
        let closure_ref = self.current_frame().closure;
        self.heap.get(closure_ref).as_closure().unwrap().upvalues[idx as usize]
    }

    fn read_upvalue_value(&self, ptr: ObjRef) -> Value {
        match self.heap.get(ptr).as_upvalue().unwrap().location {
            UpvalueLocation::Stack(i) => self.stack[i],
            UpvalueLocation::Closed(value) => value,
        }
    }

    fn write_upvalue_value(&mut self, ptr: ObjRef, value: Value) {
        let location = self.heap.get(ptr).as_upvalue().unwrap().location;
        match location {
            UpvalueLocation::Stack(i) => self.stack[i] = value,
            UpvalueLocation::Closed(_) => {
                self.heap.get_mut(ptr).as_upvalue_mut().unwrap().location = UpvalueLocation::Closed(value);
            }
        }
    }

    // ---- globals ----------------------------------------------------

    fn get_global(&mut self, idx: u8) -> Result<(), String> {
        let name_ref = self.read_constant(idx).as_obj().unwrap();
        match self.globals.get(name_ref, &self.heap) {
            Some(value) => {
                self.stack.push(value);
                Ok(())
            }
            None => {
                let name = self.heap.get(name_ref).as_string().unwrap().value.clone();
                Err(self.runtime_error(&format!("Undefined variable '{}'.", name)))
            }
        }
    }

    fn set_global(&mut self, idx: u8) -> Result<(), String> {
        let name_ref = self.read_constant(idx).as_obj().unwrap();
        let value = *self.stack.last().unwrap();
        if self.globals.set(name_ref, value, &self.heap) {
            self.globals.delete(name_ref, &self.heap);
            let name = self.heap.get(name_ref).as_string().unwrap().value.clone();
            return Err(self.runtime_error(&format!("Undefined variable '{}'.", name)));
        }
        Ok(())
    }

    // ---- arithmetic -------------------------------------------------

    fn binary_numeric(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), String> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Number(op(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), String> {
        let b = self.stack.pop().unwrap();
        let a = self.stack.pop().unwrap();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Bool(op(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    /// `+` overloads onto string concatenation. Operands are peeked, not
    /// popped, until after the (possibly GC-triggering) allocation of the
    /// result — otherwise they'd sit unrooted on neither the stack nor any
    /// table for the duration of the allocation (§4.6 invariant family).
    fn add(&mut self) -> Result<(), String> {
        let len = self.stack.len();
        let a = self.stack[len - 2];
        let b = self.stack[len - 1];
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                self.stack.truncate(len - 2);
                self.stack.push(Value::Number(x + y));
                Ok(())
            }
            (Value::Obj(pa), Value::Obj(pb))
                if self.heap.get(pa).is_string() && self.heap.get(pb).is_string() =>
            {
                let mut combined = self.heap.get(pa).as_string().unwrap().value.clone();
                combined.push_str(&self.heap.get(pb).as_string().unwrap().value);
                let ptr = self.intern_string(&combined);
                self.stack.truncate(len - 2);
                self.stack.push(Value::Obj(ptr));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
        }
    }

    // ---- calls --------------------------------------------------------

    fn call_value(&mut self, arg_count: u8) -> Result<(), String> {
        let callee_index = self.stack.len() - 1 - arg_count as usize;
        let callee = self.stack[callee_index];
        let ptr = match callee {
            Value::Obj(ptr) => ptr,
            _ => return Err(self.runtime_error("Can only call functions and classes.")),
        };

        if self.heap.get(ptr).as_closure().is_some() {
            return self.call_closure(ptr, arg_count);
        }
        if let Some(native) = self.heap.get(ptr).as_native() {
            let function = native.function;
            let args: Vec<Value> = self.stack[callee_index + 1..].to_vec();
            let result = function(&args);
            self.stack.truncate(callee_index);
            self.stack.push(result);
            return Ok(());
        }
        if self.heap.get(ptr).as_class().is_some() {
            return self.instantiate_class(ptr, callee_index, arg_count);
        }
        if self.heap.get(ptr).as_bound_method().is_some() {
            return self.call_bound_method(ptr, callee_index, arg_count);
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    fn call_closure(&mut self, closure_ref: ObjRef, arg_count: u8) -> Result<(), String> {
        let function_ref = self.heap.get(closure_ref).as_closure().unwrap().function;
        let arity = self.heap.get(function_ref).as_function().unwrap().arity;
        if arg_count != arity {
            return Err(self.runtime_error(&format!("Expected {} arguments but got {}.", arity, arg_count)));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack.len() - 1 - arg_count as usize;
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, slot_base });
        Ok(())
    }

    /// §9's flagged bug: the receiver here must be read back as an
    /// `Instance`, not cast through `String` as the source material does.
    fn instantiate_class(&mut self, class_ref: ObjRef, callee_index: usize, arg_count: u8) -> Result<(), String> {
        let instance_ref = self.alloc(Obj::Instance(ObjInstance { class: class_ref, fields: Table::new() }));
        self.stack[callee_index] = Value::Obj(instance_ref);

        let initializer = self.heap.get(class_ref).as_class().unwrap().methods.get(self.init_string, &self.heap);
        match initializer {
            Some(Value::Obj(init_ref)) => self.call_closure(init_ref, arg_count),
            _ => {
                if arg_count != 0 {
                    return Err(self.runtime_error(&format!("Expected 0 arguments but got {}.", arg_count)));
                }
                Ok(())
            }
        }
    }

    fn call_bound_method(&mut self, bound_ref: ObjRef, callee_index: usize, arg_count: u8) -> Result<(), String> {
        let bound = self.heap.get(bound_ref).as_bound_method().unwrap();
        let receiver = bound.receiver;
        let method_ref = bound.method;
        self.stack[callee_index] = receiver;
        self.call_closure(method_ref, arg_count)
    }

    // ---- properties & classes -------------------------------------------

    /// §9's other flagged bug: once `bind_method` succeeds, control must
    /// return `Ok` immediately rather than falling through into the
    /// "undefined property" error path below it.
    fn get_property(&mut self, idx: u8) -> Result<(), String> {
        let name_ref = self.read_constant(idx).as_obj().unwrap();
        let receiver = *self.stack.last().unwrap();
        let instance_ref = match receiver {
            Value::Obj(ptr) if self.heap.get(ptr).as_instance().is_some() => ptr,
            _ => return Err(self.runtime_error("Only instances have properties.")),
        };

        if let Some(value) = self.heap.get(instance_ref).as_instance().unwrap().fields.get(name_ref, &self.heap) {
            self.stack.pop();
            self.stack.push(value);
            return Ok(());
        }

        self.bind_method(instance_ref, name_ref)
    }

    fn bind_method(&mut self, instance_ref: ObjRef, name_ref: ObjRef) -> Result<(), String> {
        let class_ref = self.heap.get(instance_ref).as_instance().unwrap().class;
        let method = self.heap.get(class_ref).as_class().unwrap().methods.get(name_ref, &self.heap);
        let method_ref = match method {
            Some(Value::Obj(ptr)) => ptr,
            _ => {
                let name = self.heap.get(name_ref).as_string().unwrap().value.clone();
                return Err(self.runtime_error(&format!("Undefined property '{}'.", name)));
            }
        };
        // receiver is still on the stack (peeked in get_property) through this alloc.
        let bound_ref = self.alloc(Obj::BoundMethod(ObjBoundMethod { receiver: Value::Obj(instance_ref), method: method_ref }));
        self.stack.pop();
        self.stack.push(Value::Obj(bound_ref));
        Ok(())
    }

    fn set_property(&mut self, idx: u8) -> Result<(), String> {
        let name_ref = self.read_constant(idx).as_obj().unwrap();
        let value = *self.stack.last().unwrap();
        let receiver = self.stack[self.stack.len() - 2];
        let instance_ref = match receiver {
            Value::Obj(ptr) if self.heap.get(ptr).as_instance().is_some() => ptr,
            _ => return Err(self.runtime_error("Only instances have fields.")),
        };

        let mut fields = std::mem::take(&mut self.heap.get_mut(instance_ref).as_instance_mut().unwrap().fields);
        fields.set(name_ref, value, &self.heap);
        self.heap.get_mut(instance_ref).as_instance_mut().unwrap().fields = fields;

        self.stack.pop();
        self.stack.pop();
        self.stack.push(value);
        Ok(())
    }

    fn make_class(&mut self, idx: u8) -> Result<(), String> {
        let name_ref = self.read_constant(idx).as_obj().unwrap();
        let class_ref = self.alloc(Obj::Class(ObjClass { name: name_ref, methods: Table::new() }));
        self.stack.push(Value::Obj(class_ref));
        Ok(())
    }

    fn define_method(&mut self, idx: u8) -> Result<(), String> {
        let name_ref = self.read_constant(idx).as_obj().unwrap();
        let method_value = *self.stack.last().unwrap();
        let class_ref = self.stack[self.stack.len() - 2].as_obj().unwrap();

        let mut methods = std::mem::take(&mut self.heap.get_mut(class_ref).as_class_mut().unwrap().methods);
        methods.set(name_ref, method_value, &self.heap);
        self.heap.get_mut(class_ref).as_class_mut().unwrap().methods = methods;

        self.stack.pop();
        Ok(())
    }

    fn invoke(&mut self, idx: u8, arg_count: u8) -> Result<(), String> {
        let name_ref = self.read_constant(idx).as_obj().unwrap();
        let callee_index = self.stack.len() - 1 - arg_count as usize;
        let receiver = self.stack[callee_index];
        let instance_ref = match receiver {
            Value::Obj(ptr) if self.heap.get(ptr).as_instance().is_some() => ptr,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        if let Some(value) = self.heap.get(instance_ref).as_instance().unwrap().fields.get(name_ref, &self.heap) {
            self.stack[callee_index] = value;
            return self.call_value(arg_count);
        }

        let class_ref = self.heap.get(instance_ref).as_instance().unwrap().class;
        let method = self.heap.get(class_ref).as_class().unwrap().methods.get(name_ref, &self.heap);
        match method {
            Some(Value::Obj(method_ref)) => self.call_closure(method_ref, arg_count),
            _ => {
                let name = self.heap.get(name_ref).as_string().unwrap().value.clone();
                Err(self.runtime_error(&format!("Undefined property '{}'.", name)))
            }
        }
    }

    // ---- closures & upvalues --------------------------------------------

    fn make_closure(&mut self, idx: u8, captures: &[UpvalueCapture]) -> Result<(), String> {
        let function_ref = self.read_constant(idx).as_obj().unwrap();
        let mut upvalues = Vec::with_capacity(captures.len());
        for capture in captures {
            let upvalue_ref = if capture.is_local {
                let base = self.current_frame().slot_base;
                self.capture_upvalue(base + capture.index as usize)
            } else {
                self.current_closure_upvalue(capture.index)
            };
            self.stack.push(Value::Obj(upvalue_ref)); // keep rooted until the closure exists
            upvalues.push(upvalue_ref);
        }
        let closure_ref = self.alloc(Obj::Closure(ObjClosure { function: function_ref, upvalues }));
        for _ in 0..captures.len() {
            self.stack.pop();
        }
        self.stack.push(Value::Obj(closure_ref));
        Ok(())
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> ObjRef {
        for &existing in &self.open_upvalues {
            if self.heap.get(existing).as_upvalue().unwrap().stack_index() == Some(stack_index) {
                return existing;
            }
        }
        let new_ref = self.alloc(Obj::Upvalue(ObjUpvalue { location: UpvalueLocation::Stack(stack_index) }));
        let position = self
            .open_upvalues
            .iter()
            .position(|&r| match self.heap.get(r).as_upvalue().unwrap().stack_index() {
                Some(i) => i < stack_index,
                None => true,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(position, new_ref);
        new_ref
    }

    fn close_upvalues(&mut self, from_index: usize) {
        let mut remaining = Vec::with_capacity(self.open_upvalues.len());
        for &ptr in &self.open_upvalues {
            match self.heap.get(ptr).as_upvalue().unwrap().stack_index() {
                Some(i) if i >= from_index => {
                    let value = self.stack[i];
                    self.heap.get_mut(ptr).as_upvalue_mut().unwrap().location = UpvalueLocation::Closed(value);
                }
                _ => remaining.push(ptr),
            }
        }
        self.open_upvalues = remaining;
    }

    // ---- return -------------------------------------------------------

    /// Returns `true` once the outermost (script) frame has returned.
    fn do_return(&mut self) -> Result<bool, String> {
        let result = self.stack.pop().unwrap();
        let frame = self.frames.pop().unwrap();
        self.close_upvalues(frame.slot_base);
        self.stack.truncate(frame.slot_base);
        if self.frames.is_empty() {
            return Ok(true);
        }
        self.stack.push(result);
        Ok(false)
    }

    // ---- allocation & GC ------------------------------------------------

    /// The only entry point for heap allocation. Checks the collection
    /// threshold *before* constructing `obj`, so a triggered collection
    /// never has to reason about an object that doesn't exist yet (§4.6).
    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.allocate(obj)
    }

    /// Interns `text`, reusing an existing canonical string if one's already
    /// present (§4.4's `tableFindString`).
    pub(crate) fn intern_string(&mut self, text: &str) -> ObjRef {
        let hash = fnv1a_hash(text.as_bytes());
        if let Some(existing) = self.strings.find_string(text, hash, &self.heap) {
            return existing;
        }
        let ptr = self.alloc(Obj::String(ObjString::new(text.to_string())));
        self.strings.set(ptr, Value::Nil, &self.heap);
        ptr
    }

    pub(crate) fn define_native(&mut self, name: &str, function: crate::object::NativeFn) {
        let name_ref = self.intern_string(name);
        self.stack.push(Value::Obj(name_ref));
        let native_ref = self.alloc(Obj::Native(ObjNative { name: name.to_string(), function }));
        self.stack.push(Value::Obj(native_ref));
        self.globals.set(name_ref, Value::Obj(native_ref), &self.heap);
        self.stack.pop();
        self.stack.pop();
    }

    /// Marks every root (operand stack, call frames, globals, open
    /// upvalues, the interned `init` string, and — mid-compile — every
    /// function under construction on the compiler stack), traces to
    /// fixpoint, sweeps, and prunes the now-dead strings from the intern
    /// table (§4.6).
    fn collect_garbage(&mut self) {
        let Vm { heap, stack, frames, globals, open_upvalues, compiler_roots, init_string, .. } = self;
        let init_string_value = Value::Obj(*init_string);
        let white_strings = heap.collect(|h| {
            for value in stack.iter() {
                h.mark_value(value);
            }
            for frame in frames.iter() {
                h.mark_value(&Value::Obj(frame.closure));
            }
            for (key, value) in globals.iter() {
                h.mark_value(&Value::Obj(key));
                h.mark_value(&value);
            }
            for &upvalue in open_upvalues.iter() {
                h.mark_value(&Value::Obj(upvalue));
            }
            for &function_ref in compiler_roots.iter() {
                h.mark_value(&Value::Obj(function_ref));
            }
            h.mark_value(&init_string_value);
        });
        self.strings.remove_keys(&white_strings);
    }

    fn runtime_error(&self, message: &str) -> String {
        let mut lines = vec![message.to_string()];
        for frame in self.frames.iter().rev() {
            let closure = self.heap.get(frame.closure).as_closure().unwrap();
            let function = self.heap.get(closure.function).as_function().unwrap();
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(name_ref) => format!("{}()", self.heap.get(name_ref).as_string().unwrap().value),
                None => "script".to_string(),
            };
            lines.push(format!("[line {}] in {}", line, name));
        }
        lines.join("\n")
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_and_capture(source: &str) -> (InterpretResult, String) {
        let mut vm = Vm::new();
        vm.capture_output();
        let result = vm.interpret(source);
        (result, vm.take_output())
    }

    #[test]
    fn arithmetic_precedence() {
        let (result, output) = run_and_capture("print 1 + 2 * 3;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "7\n");
    }

    #[test]
    fn string_concatenation() {
        let (result, output) = run_and_capture(r#"print "foo" + "bar";"#);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "foobar\n");
    }

    #[test]
    fn closures_share_mutable_upvalues() {
        let source = r#"
            fun makeCounter() {
                var count = 0;
                fun increment() {
                    count = count + 1;
                    return count;
                }
                return increment;
            }
            var counter = makeCounter();
            print counter();
            print counter();
        "#;
        let (result, output) = run_and_capture(source);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn classes_init_and_methods() {
        let source = r#"
            class Greeter {
                init(name) {
                    this.name = name;
                }
                greet() {
                    return "hi " + this.name;
                }
            }
            var g = Greeter("world");
            print g.greet();
        "#;
        let (result, output) = run_and_capture(source);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "hi world\n");
    }

    #[test]
    fn while_loop_accumulates() {
        let source = r#"
            var i = 0;
            var sum = 0;
            while (i < 5) {
                sum = sum + i;
                i = i + 1;
            }
            print sum;
        "#;
        let (result, output) = run_and_capture(source);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "10\n");
    }

    #[test]
    fn undefined_variable_is_a_runtime_error() {
        let mut vm = Vm::new();
        assert_eq!(vm.interpret("print nope;"), InterpretResult::RuntimeError);
        assert_eq!(vm.diagnostics()[0], "Undefined variable 'nope'.\n[line 1] in script");
    }

    #[test]
    fn stress_gc_survives_a_live_program() {
        let mut vm = Vm::new();
        vm.set_stress_gc(true);
        vm.capture_output();
        let source = r#"
            class Pair {
                init(a, b) {
                    this.a = a;
                    this.b = b;
                }
            }
            var p = Pair("left", "right");
            print p.a + p.b;
        "#;
        assert_eq!(vm.interpret(source), InterpretResult::Ok);
        assert_eq!(vm.take_output(), "leftright\n");
    }
}
