//! Android specific bluetooth code

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jni::objects::{GlobalRef, JObject, JValue};
use jni_min_helper::*;
use winit::platform::android::activity::AndroidApp;

use crate::backend::{BluetoothBackend, RfcommListener, RfcommSocket};
use crate::bluetooth_uuid::BluetoothUuid;
use crate::device::{BluetoothAddress, BluetoothDevice};
use crate::error::{BluetoothError, Result};
use crate::events::{EventCallback, ReceiverId, ReceiverKind};

mod receiver;
mod socket;

use socket::{AndroidListener, AndroidSocket};

const BLUETOOTH_SERVICE: &str = "bluetooth";
const ACTION_REQUEST_ENABLE: &str = "android.bluetooth.adapter.action.REQUEST_ENABLE";
const ACTION_REQUEST_DISCOVERABLE: &str = "android.bluetooth.adapter.action.REQUEST_DISCOVERABLE";
const EXTRA_DISCOVERABLE_DURATION: &str = "android.bluetooth.adapter.extra.DISCOVERABLE_DURATION";
const ACTION_DEVICE_PICKER: &str = "android.bluetooth.devicepicker.action.LAUNCH";
/// The activity result code used for the enable prompt
const REQUEST_ENABLE_BT: i32 = 1;

/// Maps unexpected JNI errors to `std::io::Error`.
/// Side effect: `jni_last_cleared_ex()`.
#[inline(always)]
pub(crate) fn jerr(env: &mut jni::JNIEnv, err: jni::errors::Error) -> std::io::Error {
    use jni::errors::Error::*;
    if let JavaException = err {
        let err = jni_min_helper::jni_clear_ex(err);
        jni_min_helper::jni_last_cleared_ex()
            .ok_or(JavaException)
            .and_then(|ex| Ok((ex.get_class_name(env)?, ex.get_throwable_msg(env)?)))
            .map(|(cls, msg)| {
                if cls.contains("SecurityException") {
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, msg)
                } else if cls.contains("IllegalArgumentException") {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)
                } else if cls.contains("IOException") {
                    std::io::Error::new(std::io::ErrorKind::ConnectionAborted, msg)
                } else {
                    std::io::Error::other(format!("{cls}: {msg}"))
                }
            })
            .unwrap_or(std::io::Error::other(err))
    } else {
        std::io::Error::other(err)
    }
}

/// Access to the java vm of the running activity
pub(crate) struct Java {
    app: AndroidApp,
    vm: jni::JavaVM,
}

impl Java {
    fn new(app: AndroidApp) -> Result<Self> {
        let vm = unsafe {
            jni::JavaVM::from_raw(app.vm_as_ptr() as *mut *const jni::sys::JNIInvokeInterface_)
        }
        .map_err(|e| BluetoothError::Platform(e.to_string()))?;
        Ok(Self { app, vm })
    }

    /// Run a closure with the environment of the current thread and the activity context.
    /// Threads stay attached to the vm once they used it.
    pub(crate) fn use_env<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut jni::JNIEnv, &JObject) -> Result<T>,
    {
        let mut env = self
            .vm
            .attach_current_thread_permanently()
            .map_err(|e| BluetoothError::Platform(e.to_string()))?;
        let context = unsafe {
            JObject::from_raw(self.app.activity_as_ptr() as *mut jni::sys::_jobject)
        };
        f(&mut env, &context)
    }
}

/// Make a `java.util.UUID` from a uuid
fn java_uuid<'a>(env: &mut jni::JNIEnv<'a>, uuid: &BluetoothUuid) -> Result<JObject<'a>> {
    let s = uuid.as_str().new_jobject(env).map_err(|e| jerr(env, e))?;
    let u = env
        .call_static_method(
            "java/util/UUID",
            "fromString",
            "(Ljava/lang/String;)Ljava/util/UUID;",
            &[(&s).into()],
        )
        .get_object(env)
        .map_err(|e| jerr(env, e))?;
    Ok(u)
}

/// Start an activity for the given intent action
fn start_activity(
    env: &mut jni::JNIEnv,
    context: &JObject,
    action: &str,
    request_code: Option<i32>,
    extra: Option<(&str, i32)>,
) -> Result<()> {
    let action = action.new_jobject(env).map_err(|e| jerr(env, e))?;
    let intent = env
        .new_object(
            "android/content/Intent",
            "(Ljava/lang/String;)V",
            &[(&action).into()],
        )
        .map_err(|e| jerr(env, e))?;
    if let Some((name, value)) = extra {
        let name = name.new_jobject(env).map_err(|e| jerr(env, e))?;
        env.call_method(
            &intent,
            "putExtra",
            "(Ljava/lang/String;I)Landroid/content/Intent;",
            &[(&name).into(), JValue::Int(value)],
        )
        .get_object(env)
        .map_err(|e| jerr(env, e))?;
    }
    match request_code {
        Some(code) => env
            .call_method(
                context,
                "startActivityForResult",
                "(Landroid/content/Intent;I)V",
                &[(&intent).into(), JValue::Int(code)],
            )
            .clear_ex()
            .map_err(|e| jerr(env, e))?,
        None => env
            .call_method(
                context,
                "startActivity",
                "(Landroid/content/Intent;)V",
                &[(&intent).into()],
            )
            .clear_ex()
            .map_err(|e| jerr(env, e))?,
    }
    Ok(())
}

/// The platform bluetooth apis of an android activity
pub struct AndroidBackend {
    java: Arc<Java>,
    adapter: GlobalRef,
    next_receiver: AtomicU64,
    receivers: Mutex<HashMap<ReceiverId, jni_min_helper::BroadcastReceiver>>,
}

impl AndroidBackend {
    /// Construct the backend for the activity of the app
    pub fn new(app: AndroidApp) -> Result<Self> {
        let java = Arc::new(Java::new(app)?);
        let adapter = java.use_env(|env, context| Self::get_adapter(env, context))?;
        log::debug!("Bluetooth adapter is {:?}", adapter);
        Ok(Self {
            java,
            adapter,
            next_receiver: AtomicU64::new(1),
            receivers: Mutex::new(HashMap::new()),
        })
    }

    fn get_adapter(env: &mut jni::JNIEnv, context: &JObject) -> Result<GlobalRef> {
        let bluetooth_service = BLUETOOTH_SERVICE
            .new_jobject(env)
            .map_err(|e| jerr(env, e))?;
        let manager = env
            .call_method(
                context,
                "getSystemService",
                "(Ljava/lang/String;)Ljava/lang/Object;",
                &[(&bluetooth_service).into()],
            )
            .get_object(env)
            .map_err(|e| jerr(env, e))?;
        if manager.is_null() {
            return Err(BluetoothError::AdapterUnavailable);
        }
        let adapter = env
            .call_method(
                manager,
                "getAdapter",
                "()Landroid/bluetooth/BluetoothAdapter;",
                &[],
            )
            .get_object(env)
            .map_err(|e| jerr(env, e))?;
        if adapter.is_null() {
            return Err(BluetoothError::AdapterUnavailable);
        }
        Ok(env.new_global_ref(&adapter).map_err(|e| jerr(env, e))?)
    }

    fn remote_device<'a>(
        &self,
        env: &mut jni::JNIEnv<'a>,
        address: BluetoothAddress,
    ) -> Result<JObject<'a>> {
        let addr = address.to_string();
        let addr = addr.as_str().new_jobject(env).map_err(|e| jerr(env, e))?;
        let device = env
            .call_method(
                &self.adapter,
                "getRemoteDevice",
                "(Ljava/lang/String;)Landroid/bluetooth/BluetoothDevice;",
                &[(&addr).into()],
            )
            .get_object(env)
            .map_err(|e| jerr(env, e))?;
        if device.is_null() {
            return Err(BluetoothError::DeviceNotFound(address.to_string()));
        }
        Ok(device)
    }
}

impl BluetoothBackend for AndroidBackend {
    fn is_enabled(&self) -> Result<bool> {
        self.java.use_env(|env, _context| {
            Ok(env
                .call_method(&self.adapter, "isEnabled", "()Z", &[])
                .get_boolean()
                .map_err(|e| jerr(env, e))?)
        })
    }

    fn request_enable(&self, prompt_user: bool) -> Result<()> {
        self.java.use_env(|env, context| {
            if prompt_user {
                log::info!("Bluetooth not enabled. Requesting it to be enabled");
                start_activity(env, context, ACTION_REQUEST_ENABLE, Some(REQUEST_ENABLE_BT), None)
            } else {
                let started = env
                    .call_method(&self.adapter, "enable", "()Z", &[])
                    .get_boolean()
                    .map_err(|e| jerr(env, e))?;
                if started {
                    Ok(())
                } else {
                    Err(BluetoothError::Platform(
                        "the adapter refused to turn on".to_string(),
                    ))
                }
            }
        })
    }

    fn register_receiver(&self, kind: ReceiverKind, callback: EventCallback) -> Result<ReceiverId> {
        let receiver = jni_min_helper::BroadcastReceiver::build(move |env, _context, intent| {
            if let Some(event) = receiver::parse_intent(env, intent)? {
                if kind.accepts(&event) {
                    callback(event);
                }
            }
            Ok(())
        })
        .map_err(|e| BluetoothError::Platform(e.to_string()))?;
        self.java.use_env(|env, context| {
            let filter = env
                .new_object("android/content/IntentFilter", "()V", &[])
                .map_err(|e| jerr(env, e))?;
            for action in kind.actions() {
                let action = action.new_jobject(env).map_err(|e| jerr(env, e))?;
                env.call_method(
                    &filter,
                    "addAction",
                    "(Ljava/lang/String;)V",
                    &[(&action).into()],
                )
                .clear_ex()
                .map_err(|e| jerr(env, e))?;
            }
            env.call_method(
                context,
                "registerReceiver",
                "(Landroid/content/BroadcastReceiver;Landroid/content/IntentFilter;)Landroid/content/Intent;",
                &[JValue::Object(receiver.as_ref()), (&filter).into()],
            )
            .get_object(env)
            .map_err(|e| jerr(env, e))?;
            Ok(())
        })?;
        let id = ReceiverId(self.next_receiver.fetch_add(1, Ordering::Relaxed));
        self.receivers
            .lock()
            .map_err(|_| BluetoothError::Platform("receiver table poisoned".to_string()))?
            .insert(id, receiver);
        Ok(id)
    }

    fn unregister_receiver(&self, id: ReceiverId) -> Result<()> {
        let receiver = self
            .receivers
            .lock()
            .map_err(|_| BluetoothError::Platform("receiver table poisoned".to_string()))?
            .remove(&id)
            .ok_or_else(|| {
                BluetoothError::InvalidArgument(format!("receiver {:?} is not registered", id))
            })?;
        self.java.use_env(|env, context| {
            env.call_method(
                context,
                "unregisterReceiver",
                "(Landroid/content/BroadcastReceiver;)V",
                &[JValue::Object(receiver.as_ref())],
            )
            .clear_ex()
            .map_err(|e| jerr(env, e))?;
            Ok(())
        })
    }

    fn start_discovery(&self) -> Result<()> {
        self.java.use_env(|env, _context| {
            let started = env
                .call_method(&self.adapter, "startDiscovery", "()Z", &[])
                .get_boolean()
                .map_err(|e| jerr(env, e))?;
            if started {
                Ok(())
            } else {
                Err(BluetoothError::AdapterUnavailable)
            }
        })
    }

    fn cancel_discovery(&self) -> Result<()> {
        self.java.use_env(|env, _context| {
            env.call_method(&self.adapter, "cancelDiscovery", "()Z", &[])
                .get_boolean()
                .map_err(|e| jerr(env, e))?;
            Ok(())
        })
    }

    fn show_device_picker(&self, request_code: i32) -> Result<()> {
        self.java.use_env(|env, context| {
            start_activity(env, context, ACTION_DEVICE_PICKER, Some(request_code), None)
        })
    }

    fn set_discoverable(&self, duration: Duration) -> Result<()> {
        let secs = i32::try_from(duration.as_secs()).unwrap_or(i32::MAX);
        self.java.use_env(|env, context| {
            start_activity(
                env,
                context,
                ACTION_REQUEST_DISCOVERABLE,
                None,
                Some((EXTRA_DISCOVERABLE_DURATION, secs)),
            )
        })
    }

    fn bonded_devices(&self) -> Result<Vec<BluetoothDevice>> {
        self.java.use_env(|env, _context| {
            let dev_set = env
                .call_method(&self.adapter, "getBondedDevices", "()Ljava/util/Set;", &[])
                .get_object(env)
                .map_err(|e| jerr(env, e))?;
            if dev_set.is_null() {
                return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into());
            }
            let jarr = env
                .call_method(&dev_set, "toArray", "()[Ljava/lang/Object;", &[])
                .get_object(env)
                .map_err(|e| jerr(env, e))?;
            let jarr: &jni::objects::JObjectArray = jarr.as_ref().into();
            let len = env.get_array_length(jarr).map_err(|e| jerr(env, e))?;
            let mut devs = Vec::with_capacity(len as usize);
            for i in 0..len {
                let dev = env
                    .get_object_array_element(jarr, i)
                    .map_err(|e| jerr(env, e))?;
                if let Some(d) = receiver::device_info(env, &dev) {
                    devs.push(d);
                }
            }
            Ok(devs)
        })
    }

    fn connect_rfcomm(
        &self,
        address: BluetoothAddress,
        uuid: &BluetoothUuid,
        secure: bool,
    ) -> Result<Box<dyn RfcommSocket>> {
        let (socket, remote) = self.java.use_env(|env, _context| {
            let device = self.remote_device(env, address)?;
            let remote = receiver::device_info(env, &device)
                .unwrap_or_else(|| BluetoothDevice::new(address));
            let uuid = java_uuid(env, uuid)?;
            let method_name = if secure {
                "createRfcommSocketToServiceRecord"
            } else {
                "createInsecureRfcommSocketToServiceRecord"
            };
            let socket = env
                .call_method(
                    &device,
                    method_name,
                    "(Ljava/util/UUID;)Landroid/bluetooth/BluetoothSocket;",
                    &[(&uuid).into()],
                )
                .get_object(env)
                .globalize(env)
                .map_err(|e| jerr(env, e))?;
            // discovery slows the connection down
            let _ = env
                .call_method(&self.adapter, "cancelDiscovery", "()Z", &[])
                .clear_ex();
            Ok((socket, remote))
        })?;
        log::info!("Connecting rfcomm to {}", remote.address);
        let socket = AndroidSocket::connect(self.java.clone(), socket, remote)?;
        Ok(Box::new(socket))
    }

    fn listen_rfcomm(
        &self,
        uuid: &BluetoothUuid,
        name: &str,
        secure: bool,
    ) -> Result<Box<dyn RfcommListener>> {
        let server = self.java.use_env(|env, _context| {
            let name = name.new_jobject(env).map_err(|e| jerr(env, e))?;
            let uuid = java_uuid(env, uuid)?;
            let method_name = if secure {
                "listenUsingRfcommWithServiceRecord"
            } else {
                "listenUsingInsecureRfcommWithServiceRecord"
            };
            Ok(env
                .call_method(
                    &self.adapter,
                    method_name,
                    "(Ljava/lang/String;Ljava/util/UUID;)Landroid/bluetooth/BluetoothServerSocket;",
                    &[(&name).into(), (&uuid).into()],
                )
                .get_object(env)
                .globalize(env)
                .map_err(|e| jerr(env, e))?)
        })?;
        Ok(Box::new(AndroidListener::new(self.java.clone(), server)))
    }

    fn connect_profile(&self, _device: &BluetoothDevice, _profile: &BluetoothUuid) -> Result<()> {
        Err(BluetoothError::Unsupported(
            "profile connections are not available on android",
        ))
    }
}

impl Drop for AndroidBackend {
    fn drop(&mut self) {
        let ids: Vec<ReceiverId> = self
            .receivers
            .lock()
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default();
        for id in ids {
            if let Err(e) = self.unregister_receiver(id) {
                log::warn!("Unable to unregister receiver {:?}: {}", id, e);
            }
        }
    }
}
