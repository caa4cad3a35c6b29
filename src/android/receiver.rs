//! Turning bluetooth broadcast intents into system events

use jni::objects::{JObject, JValue};
use jni_min_helper::*;

use crate::device::{BluetoothAddress, BluetoothDevice};
use crate::events::SystemEvent;

const ACTION_STATE_CHANGED: &str = "android.bluetooth.adapter.action.STATE_CHANGED";
const ACTION_DISCOVERY_STARTED: &str = "android.bluetooth.adapter.action.DISCOVERY_STARTED";
const ACTION_DISCOVERY_FINISHED: &str = "android.bluetooth.adapter.action.DISCOVERY_FINISHED";
const ACTION_BOND_STATE_CHANGED: &str = "android.bluetooth.device.action.BOND_STATE_CHANGED";
const ACTION_ACL_CONNECTED: &str = "android.bluetooth.device.action.ACL_CONNECTED";
const ACTION_ACL_DISCONNECTED: &str = "android.bluetooth.device.action.ACL_DISCONNECTED";
const ACTION_FOUND: &str = "android.bluetooth.device.action.FOUND";

const EXTRA_STATE: &str = "android.bluetooth.adapter.extra.STATE";
const EXTRA_BOND_STATE: &str = "android.bluetooth.device.extra.BOND_STATE";
const EXTRA_DEVICE: &str = "android.bluetooth.device.extra.DEVICE";

const STATE_OFF: i32 = 10;
const STATE_ON: i32 = 12;
const BOND_NONE: i32 = 10;
const BOND_BONDED: i32 = 12;

fn int_extra(env: &mut jni::JNIEnv, intent: &JObject, name: &str) -> Result<i32, jni::errors::Error> {
    let name = name.new_jobject(env)?;
    env.call_method(
        intent,
        "getIntExtra",
        "(Ljava/lang/String;I)I",
        &[(&name).into(), JValue::Int(-1)],
    )
    .get_int()
}

fn device_extra(
    env: &mut jni::JNIEnv,
    intent: &JObject,
) -> Result<Option<BluetoothDevice>, jni::errors::Error> {
    let name = EXTRA_DEVICE.new_jobject(env)?;
    let dev = env
        .call_method(
            intent,
            "getParcelableExtra",
            "(Ljava/lang/String;)Landroid/os/Parcelable;",
            &[(&name).into()],
        )
        .get_object(env)?;
    if dev.is_null() {
        return Ok(None);
    }
    Ok(device_info(env, &dev))
}

/// Read the address and name of an `android.bluetooth.BluetoothDevice`
pub(super) fn device_info(env: &mut jni::JNIEnv, dev: &JObject) -> Option<BluetoothDevice> {
    let address = env
        .call_method(dev, "getAddress", "()Ljava/lang/String;", &[])
        .get_object(env)
        .ok()?;
    if address.is_null() {
        return None;
    }
    let address: BluetoothAddress = address.get_string(env).ok()?.parse().ok()?;
    // getName throws without the connect permission
    let name = env
        .call_method(dev, "getName", "()Ljava/lang/String;", &[])
        .get_object(env)
        .ok()
        .filter(|n| !n.is_null())
        .and_then(|n| n.get_string(env).ok());
    Some(BluetoothDevice { address, name })
}

/// Translate a received intent, `None` for intents no event is made for
pub(super) fn parse_intent(
    env: &mut jni::JNIEnv,
    intent: &JObject,
) -> Result<Option<SystemEvent>, jni::errors::Error> {
    let action = env
        .call_method(intent, "getAction", "()Ljava/lang/String;", &[])
        .get_object(env)?;
    if action.is_null() {
        return Err(jni::errors::Error::NullPtr("No action"));
    }
    let action = action.get_string(env)?;
    log::trace!("Received intent {}", action);
    let event = match action.as_str() {
        ACTION_STATE_CHANGED => match int_extra(env, intent, EXTRA_STATE)? {
            STATE_ON => Some(SystemEvent::AdapterEnabled),
            STATE_OFF => Some(SystemEvent::AdapterDisabled),
            _ => None,
        },
        ACTION_BOND_STATE_CHANGED => {
            let state = int_extra(env, intent, EXTRA_BOND_STATE)?;
            let dev = device_extra(env, intent)?;
            match state {
                BOND_BONDED => dev.map(SystemEvent::DevicePaired),
                BOND_NONE => dev.map(SystemEvent::DeviceUnpaired),
                _ => None,
            }
        }
        ACTION_ACL_CONNECTED => device_extra(env, intent)?.map(SystemEvent::DeviceConnected),
        ACTION_ACL_DISCONNECTED => device_extra(env, intent)?.map(SystemEvent::DeviceDisconnected),
        ACTION_DISCOVERY_STARTED => Some(SystemEvent::DiscoveryStarted),
        ACTION_DISCOVERY_FINISHED => Some(SystemEvent::DiscoveryFinished),
        ACTION_FOUND => device_extra(env, intent)?.map(SystemEvent::DeviceFound),
        _ => None,
    };
    Ok(event)
}
