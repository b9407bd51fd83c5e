use microbit::hal::{
    Timer,
    timer,
    uarte::{self, Uarte},
};
use stimlink::link::{FrameDecoder, OutFrame, Request};

/// Wait per byte before giving the main loop back, 1 ms at 1 MHz count rate.
const POLL_CYCLES: u32 = 1_000;

/// GATT bridge on the USB serial port.
pub struct UartBridge<U: uarte::Instance, T: timer::Instance> {
    uarte: Uarte<U>,
    timer: Timer<T>,
    decoder: FrameDecoder,
}

impl<U: uarte::Instance, T: timer::Instance> UartBridge<U, T> {
    pub fn new(uarte: Uarte<U>, timer: Timer<T>) -> Self {
        UartBridge {
            uarte,
            timer,
            decoder: FrameDecoder::new(),
        }
    }

    /// Read until a request completes or the line goes quiet.
    pub fn poll(&mut self) -> Option<Request> {
        let mut byte = [0u8; 1];
        loop {
            match self.uarte.read_timeout(&mut byte, &mut self.timer, POLL_CYCLES) {
                Ok(()) => match self.decoder.push(byte[0]) {
                    Ok(Some(request)) => return Some(request),
                    Ok(None) => {}
                    Err(e) => log::warn!("bridge frame dropped: {}", e),
                },
                Err(uarte::Error::Timeout(_)) => return None,
                Err(e) => {
                    log::warn!("bridge read failed: {:?}", e);
                    return None;
                }
            }
        }
    }

    pub fn send(&mut self, frame: &OutFrame) {
        // EasyDMA only reads from RAM
        let mut buf = [0u8; 8];
        let bytes = frame.as_bytes();
        buf[..bytes.len()].copy_from_slice(bytes);
        if let Err(e) = self.uarte.write(&buf[..bytes.len()]) {
            log::warn!("bridge write failed: {:?}", e);
        }
    }
}
