//! Device and interface descriptors
//!
//! A [`Descriptor`] is both the identity of a concrete interface seen on the
//! bus and the pattern half of a rule. In a pattern, [`WILDCARD`] in a field
//! matches any candidate value.

use std::fmt;
use std::ops::{Index, IndexMut};

/// Pattern value matching any candidate value
///
/// Zero is also what rule files use for "any", so the numeric form of a
/// pattern loads back unchanged.
pub const WILDCARD: u16 = 0;

/// Number of fields in a descriptor
pub const DESCRIPTOR_FIELDS: usize = 5;

/// Descriptor field positions, in rule file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Bus = 0,
    Port = 1,
    VendorId = 2,
    ProductId = 3,
    InterfaceClass = 4,
}

impl Field {
    /// Every field in order
    pub const ALL: [Field; DESCRIPTOR_FIELDS] = [
        Field::Bus,
        Field::Port,
        Field::VendorId,
        Field::ProductId,
        Field::InterfaceClass,
    ];

    /// Fields identifying the device itself (everything but the interface class)
    pub const DEVICE: [Field; 4] = [Field::Bus, Field::Port, Field::VendorId, Field::ProductId];

    /// Label used in the readable rendering
    pub fn label(self) -> &'static str {
        match self {
            Field::Bus => "BUS",
            Field::Port => "PORT",
            Field::VendorId => "VENDOR ID",
            Field::ProductId => "PRODUCT ID",
            Field::InterfaceClass => "INTERFACE CLASS",
        }
    }
}

/// Five-field identity or pattern: bus, port, vendor id, product id, interface class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Descriptor {
    fields: [u16; DESCRIPTOR_FIELDS],
}

impl Descriptor {
    /// Pattern matching every descriptor
    pub const ANY: Descriptor = Descriptor {
        fields: [WILDCARD; DESCRIPTOR_FIELDS],
    };

    pub const fn new(
        bus: u16,
        port: u16,
        vendor_id: u16,
        product_id: u16,
        interface_class: u16,
    ) -> Self {
        Self {
            fields: [bus, port, vendor_id, product_id, interface_class],
        }
    }

    pub fn bus(&self) -> u16 {
        self[Field::Bus]
    }

    pub fn port(&self) -> u16 {
        self[Field::Port]
    }

    pub fn vendor_id(&self) -> u16 {
        self[Field::VendorId]
    }

    pub fn product_id(&self) -> u16 {
        self[Field::ProductId]
    }

    pub fn interface_class(&self) -> u16 {
        self[Field::InterfaceClass]
    }

    /// Copy of this descriptor with the interface class replaced
    pub fn with_interface_class(mut self, interface_class: u16) -> Self {
        self[Field::InterfaceClass] = interface_class;
        self
    }

    /// Whether this pattern applies to `candidate`
    ///
    /// Every field must be [`WILDCARD`] or equal to the candidate's field.
    pub fn relevant(&self, candidate: &Descriptor) -> bool {
        self.fields
            .iter()
            .zip(candidate.fields.iter())
            .all(|(pattern, value)| *pattern == WILDCARD || pattern == value)
    }

    /// Render all five fields
    ///
    /// The compact form is five space separated numbers. The readable form
    /// wraps each one in a bracketed label, e.g. `[BUS:1]`.
    pub fn render(&self, readable: bool) -> String {
        Field::ALL
            .iter()
            .map(|field| {
                if readable {
                    format!("[{}:{}]", field.label(), self[*field])
                } else {
                    self[*field].to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render only the device identifying fields (no interface class)
    pub fn device_fields(&self) -> String {
        Field::DEVICE
            .iter()
            .map(|field| self[*field].to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<[u16; DESCRIPTOR_FIELDS]> for Descriptor {
    fn from(fields: [u16; DESCRIPTOR_FIELDS]) -> Self {
        Self { fields }
    }
}

impl Index<Field> for Descriptor {
    type Output = u16;

    fn index(&self, field: Field) -> &u16 {
        &self.fields[field as usize]
    }
}

impl IndexMut<Field> for Descriptor {
    fn index_mut(&mut self, field: Field) -> &mut u16 {
        &mut self.fields[field as usize]
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}
