use hal::gpio::{Pin, PinMode, Port};

pub mod spindle;
pub mod steppers;
pub mod switches;

/// Represents the definition of a GPIO pin.
pub struct PinDef {
    /// The port to which the pin belongs (e.g., Port::A, Port::B).
    port: Port,
    /// The pin number within the port.
    pin: u8,
    /// The mode of the pin (e.g., Output, Input, Alternate function).
    mode: PinMode,
}

impl PinDef {
    /// Converts the PinDef struct to a Pin struct. Useful for predefined pin
    /// configurations.
    pub fn init(&self) -> Pin {
        Pin::new(self.port, self.pin, self.mode)
    }
}
