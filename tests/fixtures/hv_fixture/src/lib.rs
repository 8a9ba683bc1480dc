//! Backend module loaded by the native loading tests.
//!
//! Exports a subset of the operations. `ResumePod` and the device
//! operations are left out, and `PausePod` always fails.

use hv_plugin::export_operation;
use hv_plugin::plugin::abi::{HvBuf, HvCapabilities, HvInstance, HvStr, HV_OK};
use hv_plugin::plugin::export;
use hv_plugin::PodDescriptor;

struct Fixture {
    pod_id: String,
    running: bool,
}

unsafe extern "C" fn init(pod: HvStr, out: *mut HvInstance, err: *mut HvBuf) -> i32 {
    let pod: PodDescriptor = match export::read_json(pod) {
        Ok(pod) => pod,
        Err(e) => return export::fail(err, &e),
    };
    *out = export::into_instance(Fixture {
        pod_id: pod.id,
        running: false,
    });
    HV_OK
}

unsafe extern "C" fn create(_instance: HvInstance, _config: HvStr, _err: *mut HvBuf) -> i32 {
    HV_OK
}

unsafe extern "C" fn start(instance: HvInstance, err: *mut HvBuf) -> i32 {
    export::guard(err, || {
        let vm = export::instance_mut::<Fixture>(instance);
        if vm.running {
            return Err(format!("pod {} already running", vm.pod_id));
        }
        vm.running = true;
        Ok(())
    })
}

unsafe extern "C" fn wait(_instance: HvInstance, _timeout: i64, _err: *mut HvBuf) -> i32 {
    HV_OK
}

unsafe extern "C" fn stop(instance: HvInstance, err: *mut HvBuf) -> i32 {
    export::guard(err, || {
        export::instance_mut::<Fixture>(instance).running = false;
        Ok(())
    })
}

unsafe extern "C" fn pause(_instance: HvInstance, err: *mut HvBuf) -> i32 {
    export::fail(err, "pause not supported")
}

unsafe extern "C" fn console(instance: HvInstance, pod_id: HvStr, out: *mut HvBuf) {
    let vm = export::instance_ref::<Fixture>(instance);
    let requested = export::read_str(pod_id);
    if requested == vm.pod_id {
        export::write_str(out, &format!("/run/hv-fixture/{}.sock", vm.pod_id));
    }
}

unsafe extern "C" fn capabilities(_instance: HvInstance) -> HvCapabilities {
    HvCapabilities {
        flags: 0b11,
        reserved: 0,
    }
}

export_operation!(Init, init);
export_operation!(CreatePod, create);
export_operation!(StartPod, start);
export_operation!(WaitPod, wait);
export_operation!(StopPod, stop);
export_operation!(PausePod, pause);
export_operation!(GetPodConsole, console);
export_operation!(Capabilities, capabilities);
