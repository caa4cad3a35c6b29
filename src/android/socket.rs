//! bluetooth socket code on android

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use jni::objects::{GlobalRef, JValue};
use jni_min_helper::*;

use super::{Java, jerr};
use crate::backend::{RfcommListener, RfcommSocket};
use crate::device::BluetoothDevice;
use crate::error::{BluetoothError, Result};
use crate::settings::MAX_READ_BUFFER_SIZE;

/// A connected `android.bluetooth.BluetoothSocket` and its io streams. Reads block in java,
/// closing the socket from another thread wakes them up.
///
/// Reference:
/// <https://developer.android.com/develop/connectivity/bluetooth/transfer-data>
pub(super) struct AndroidSocket {
    java: Arc<Java>,
    internal: GlobalRef,
    input_stream: GlobalRef,
    output_stream: GlobalRef,
    remote: BluetoothDevice,
    closed: AtomicBool,
}

impl AndroidSocket {
    /// Connect a socket made by `createRfcommSocketToServiceRecord`
    pub(super) fn connect(java: Arc<Java>, internal: GlobalRef, remote: BluetoothDevice) -> Result<Self> {
        java.use_env(|env, _context| {
            env.call_method(&internal, "connect", "()V", &[])
                .clear_ex()
                .map_err(|e| jerr(env, e))
                .inspect_err(|e| log::error!("Connect error is {:?}", e))?;
            Ok(())
        })?;
        Self::build(java, internal, remote)
    }

    /// Wrap a socket that is already connected
    pub(super) fn build(java: Arc<Java>, internal: GlobalRef, remote: BluetoothDevice) -> Result<Self> {
        let (input_stream, output_stream) = java.use_env(|env, _context| {
            let input = env
                .call_method(&internal, "getInputStream", "()Ljava/io/InputStream;", &[])
                .get_object(env)
                .globalize(env)
                .map_err(|e| jerr(env, e))?;
            let output = env
                .call_method(&internal, "getOutputStream", "()Ljava/io/OutputStream;", &[])
                .get_object(env)
                .globalize(env)
                .map_err(|e| jerr(env, e))?;
            Ok((input, output))
        })?;
        Ok(Self {
            java,
            internal,
            input_stream,
            output_stream,
            remote,
            closed: AtomicBool::new(false),
        })
    }

    fn io_err(e: BluetoothError) -> std::io::Error {
        match e {
            BluetoothError::Io(e) => e,
            e => std::io::Error::other(e.to_string()),
        }
    }
}

impl RfcommSocket for AndroidSocket {
    fn remote(&self) -> BluetoothDevice {
        self.remote.clone()
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::NotConnected));
        }
        let want = buf.len().min(MAX_READ_BUFFER_SIZE) as i32;
        self.java
            .use_env(|env, _context| {
                let array = env
                    .new_byte_array(want)
                    .auto_local(env)
                    .map_err(|e| jerr(env, e))?;
                let array: &jni::objects::JByteArray<'_> = array.as_ref().into();
                let read = env
                    .call_method(
                        &self.input_stream,
                        "read",
                        "([BII)I",
                        &[JValue::Object(array), JValue::Int(0), JValue::Int(want)],
                    )
                    .get_int();
                let len = match read {
                    Ok(len) if len < 0 => return Ok(0),
                    Ok(len) => len as usize,
                    Err(_) if self.closed.load(Ordering::SeqCst) => {
                        let _ = jni_last_cleared_ex();
                        return Err(std::io::Error::from(std::io::ErrorKind::NotConnected).into());
                    }
                    Err(e) => return Err(jerr(env, e).into()),
                };
                // Safety: casts `&mut [u8]` to `&mut [i8]` for `get_byte_array_region`,
                // `len` <= `buf.len()`.
                let tmp = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut i8, len) };
                env.get_byte_array_region(array, 0, tmp)
                    .map_err(|e| jerr(env, e))?;
                Ok(len)
            })
            .map_err(Self::io_err)
    }

    fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::NotConnected));
        }
        self.java
            .use_env(|env, _context| {
                let array = env
                    .byte_array_from_slice(data)
                    .auto_local(env)
                    .map_err(|e| jerr(env, e))?;
                let array: &jni::objects::JByteArray<'_> = array.as_ref().into();
                env.call_method(&self.output_stream, "write", "([B)V", &[JValue::Object(array)])
                    .clear_ex()
                    .map_err(|e| jerr(env, e))?;
                env.call_method(&self.output_stream, "flush", "()V", &[])
                    .clear_ex()
                    .map_err(|e| jerr(env, e))?;
                Ok(())
            })
            .map_err(Self::io_err)
    }

    fn close(&self) -> std::io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.java
            .use_env(|env, _context| {
                env.call_method(&self.internal, "close", "()V", &[])
                    .clear_ex()
                    .map_err(|e| jerr(env, e))?;
                Ok(())
            })
            .map_err(Self::io_err)
    }
}

impl Drop for AndroidSocket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A listening `android.bluetooth.BluetoothServerSocket`
pub(super) struct AndroidListener {
    java: Arc<Java>,
    server: GlobalRef,
    closed: AtomicBool,
}

impl AndroidListener {
    pub(super) fn new(java: Arc<Java>, server: GlobalRef) -> Self {
        Self {
            java,
            server,
            closed: AtomicBool::new(false),
        }
    }
}

impl RfcommListener for AndroidListener {
    fn accept(&self) -> Result<Box<dyn RfcommSocket>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BluetoothError::NotConnected);
        }
        let (socket, remote) = self.java.use_env(|env, _context| {
            let socket = env
                .call_method(&self.server, "accept", "()Landroid/bluetooth/BluetoothSocket;", &[])
                .get_object(env);
            let socket = match socket {
                Ok(s) if !s.is_null() => s,
                Ok(_) => return Err(BluetoothError::NotConnected),
                Err(_) if self.closed.load(Ordering::SeqCst) => {
                    let _ = jni_last_cleared_ex();
                    return Err(BluetoothError::NotConnected);
                }
                Err(e) => return Err(jerr(env, e).into()),
            };
            let dev = env
                .call_method(&socket, "getRemoteDevice", "()Landroid/bluetooth/BluetoothDevice;", &[])
                .get_object(env)
                .map_err(|e| jerr(env, e))?;
            let remote = super::receiver::device_info(env, &dev).ok_or_else(|| {
                BluetoothError::Platform("accepted socket has no remote device".to_string())
            })?;
            let socket = env.new_global_ref(&socket).map_err(|e| jerr(env, e))?;
            Ok((socket, remote))
        })?;
        log::info!("Accepted rfcomm connection from {}", remote.address);
        Ok(Box::new(AndroidSocket::build(self.java.clone(), socket, remote)?))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.java.use_env(|env, _context| {
            env.call_method(&self.server, "close", "()V", &[])
                .clear_ex()
                .map_err(|e| jerr(env, e))?;
            Ok(())
        })
    }
}
