//! COM1 mirror (QEMU `-serial stdio`) that keeps working when the console does not.

use core::fmt::Write;

use spin::Mutex;
use uart_16550::SerialPort;

static COM1: Mutex<Option<SerialPort>> = Mutex::new(None);

pub unsafe fn init_com1() {
    let mut port = unsafe { SerialPort::new(0x3F8) };
    port.init();
    *COM1.lock() = Some(port);
}

fn write_raw(s: &str) {
    if let Some(ref mut port) = *COM1.lock() {
        for b in s.bytes() {
            if b == b'\n' {
                port.send(b'\r');
            }
            port.send(b);
        }
    }
}

pub struct Serial;

impl Write for Serial {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write_raw(s);
        Ok(())
    }
}

macro_rules! slog {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = writeln!(&mut $crate::serial::Serial, $($arg)*);
    }};
}
