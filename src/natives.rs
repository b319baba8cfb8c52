// File: src/natives.rs
//
// Native (host-implemented) functions installed into every fresh `Vm`
// (§6). Each one is a plain `fn(&[Value]) -> Value` — no arity checking
// here, matching the source material's native call convention.

use crate::value::Value;
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    vm.define_native("clock", clock);
}

/// Seconds since the Unix epoch, as a float. Lox's own benchmark scripts
/// use this to time themselves (§6).
fn clock(_args: &[Value]) -> Value {
    use std::time::{SystemTime, UNIX_EPOCH};
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Value::Number(elapsed.as_secs_f64())
}
