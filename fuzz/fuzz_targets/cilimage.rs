#![no_main]

use dotforge::runtime::{
    LoadedModule, ReferenceRuntime, RuntimeInstance, RuntimeType,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(module) = ReferenceRuntime::new().load_bytes(data.to_vec()) else {
        return;
    };
    let Ok(test_class) = module.resolve_type("SampleLib.TestClass") else {
        return;
    };
    let Ok(method) = test_class.find_method("TestMethod") else {
        return;
    };
    if let Ok(mut instance) = test_class.construct() {
        let _ = instance.invoke(&method);
    }
});
