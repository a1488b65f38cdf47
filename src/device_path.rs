//! UEFI device path identifying a PCI Express root bridge.

use core::{
	fmt::{self, Display, Formatter},
	mem::size_of,
};

use static_assertions::const_assert_eq;
use zerocopy::{
	byteorder::little_endian::{U16, U32},
	FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

pub const ACPI_DEVICE_PATH: u8 = 0x02;
pub const ACPI_DP: u8 = 0x01;
pub const END_DEVICE_PATH_TYPE: u8 = 0x7F;
pub const END_ENTIRE_DEVICE_PATH_SUBTYPE: u8 = 0xFF;

/// Compresses a PNP product ID into the EISA format used by ACPI `_HID`.
pub const fn eisa_pnp_id(product_id: u16) -> u32 {
	((product_id as u32) << 16) | 0x41D0
}

/// `PNP0A08`, PCI Express root bridge.
pub const PCI_EXPRESS_ROOT_HID: u32 = eisa_pnp_id(0x0A08);
/// `PNP0A03`, conventional PCI root bridge.
pub const PCI_ROOT_HID: u32 = eisa_pnp_id(0x0A03);

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct DevicePathHeader {
	pub device_type: u8,
	pub sub_type: u8,
	pub length: U16,
}

const_assert_eq!(size_of::<DevicePathHeader>(), 4);

/// ACPI HID device path node.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct AcpiHidDevicePath {
	pub header: DevicePathHeader,
	pub hid: U32,
	pub uid: U32,
}

const_assert_eq!(size_of::<AcpiHidDevicePath>(), 12);

/// Complete device path of a root bridge: a single ACPI HID node followed by
/// the end-of-path node.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct RootBridgeDevicePath {
	pub acpi: AcpiHidDevicePath,
	pub end: DevicePathHeader,
}

const_assert_eq!(size_of::<RootBridgeDevicePath>(), 16);

impl RootBridgeDevicePath {
	pub const fn new(uid: u32) -> Self {
		Self {
			acpi: AcpiHidDevicePath {
				header: DevicePathHeader {
					device_type: ACPI_DEVICE_PATH,
					sub_type: ACPI_DP,
					length: U16::new(size_of::<AcpiHidDevicePath>() as u16),
				},
				hid: U32::new(PCI_EXPRESS_ROOT_HID),
				uid: U32::new(uid),
			},
			end: DevicePathHeader {
				device_type: END_DEVICE_PATH_TYPE,
				sub_type: END_ENTIRE_DEVICE_PATH_SUBTYPE,
				length: U16::new(size_of::<DevicePathHeader>() as u16),
			},
		}
	}

	pub fn hid(&self) -> u32 {
		self.acpi.hid.get()
	}

	pub fn uid(&self) -> u32 {
		self.acpi.uid.get()
	}
}

/// Formats the path in the UEFI text representation, e.g. `PcieRoot(0x1)`.
impl Display for RootBridgeDevicePath {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self.hid() {
			PCI_EXPRESS_ROOT_HID => write!(f, "PcieRoot({:#x})", self.uid()),
			PCI_ROOT_HID => write!(f, "PciRoot({:#x})", self.uid()),
			hid => write!(f, "Acpi({hid:#x},{:#x})", self.uid()),
		}
	}
}
