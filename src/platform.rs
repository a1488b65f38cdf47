//! Fixed platform configuration of the PCI Express controllers.

use core::fmt::{self, Display, Formatter};

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use crate::error::Error;

pub const PCIE_SEGMENT_PCIE20: u32 = 0;
pub const PCIE_SEGMENT_PCIE30X1: u32 = 1;
pub const PCIE_SEGMENT_PCIE30X2: u32 = 2;

/// One of the PCI Express controllers of the SoC, in segment assignment
/// priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive)]
#[repr(u8)]
pub enum ControllerKind {
	/// Dual-lane capable PCIe 2.0 controller, wired as x1.
	Pcie2x1,
	/// Single-lane PCIe 3.0 controller.
	Pcie3x1,
	/// Dual-lane PCIe 3.0 controller.
	Pcie3x2,
}

impl ControllerKind {
	pub const COUNT: usize = 3;
	pub const ALL: [Self; Self::COUNT] = [Self::Pcie2x1, Self::Pcie3x1, Self::Pcie3x2];

	pub const fn index(self) -> usize {
		self as usize
	}

	pub const fn flag(self) -> ControllerSet {
		match self {
			Self::Pcie2x1 => ControllerSet::PCIE2X1,
			Self::Pcie3x1 => ControllerSet::PCIE3X1,
			Self::Pcie3x2 => ControllerSet::PCIE3X2,
		}
	}
}

impl Display for ControllerKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Pcie2x1 => "2x1",
			Self::Pcie3x1 => "3x1",
			Self::Pcie3x2 => "3x2",
		})
	}
}

bitflags! {
	/// Set of [controllers](ControllerKind).
	#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
	pub struct ControllerSet: u8 {
		const PCIE2X1 = 1 << ControllerKind::Pcie2x1 as u8;
		const PCIE3X1 = 1 << ControllerKind::Pcie3x1 as u8;
		const PCIE3X2 = 1 << ControllerKind::Pcie3x2 as u8;
	}
}

impl ControllerSet {
	/// Iterates over the contained kinds in priority order.
	pub fn kinds(self) -> impl Iterator<Item = ControllerKind> {
		ControllerKind::ALL
			.into_iter()
			.filter(move |kind| self.contains(kind.flag()))
	}

	pub fn count(self) -> usize {
		self.bits().count_ones() as usize
	}
}

/// Target link speed of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive)]
#[repr(u32)]
pub enum LinkSpeed {
	/// 2.5 GT/s
	Gen1 = 1,
	/// 5 GT/s
	Gen2,
	/// 8 GT/s
	Gen3,
}

/// A GPIO line, identified by bank and pin within the bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpioPin {
	pub bank: u32,
	pub pin: u32,
}

impl GpioPin {
	pub const fn new(bank: u32, pin: u32) -> Self {
		Self { bank, pin }
	}
}

/// Configuration of a single controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerSlot {
	pub enabled: bool,
	/// Base of the APB register block.
	pub apb_base: u64,
	/// Base of the DBI (configuration space) window.
	pub dbi_base: u64,
	pub segment: u32,
	/// Physical base of the downstream bus address space.
	pub bus_base: u64,
	pub num_lanes: u32,
	pub link_speed: LinkSpeed,
	pub power_gpio: GpioPin,
	pub reset_gpio: GpioPin,
}

/// Resource windows shared by every root bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceWindows {
	pub bus_min: u32,
	pub bus_max: u32,
	pub io_base: u64,
	pub io_size: u64,
	/// CPU address the I/O window is mapped at.
	pub io_translation: u64,
	pub mmio32_base: u32,
	pub mmio32_size: u32,
	pub mmio64_base: u64,
	pub mmio64_size: u64,
}

impl ResourceWindows {
	pub fn validate(&self) -> Result<(), Error> {
		if self.bus_min > self.bus_max || self.bus_max > 0xFF {
			return Err(Error::InvalidWindow("bus number range"));
		}
		if self.io_size == 0 || self.io_base.checked_add(self.io_size - 1).is_none() {
			return Err(Error::InvalidWindow("I/O window"));
		}
		if self.mmio32_size == 0 || self.mmio32_base.checked_add(self.mmio32_size - 1).is_none()
		{
			return Err(Error::InvalidWindow("32-bit memory window"));
		}
		if self.mmio64_size == 0 || self.mmio64_base.checked_add(self.mmio64_size - 1).is_none()
		{
			return Err(Error::InvalidWindow("64-bit memory window"));
		}
		Ok(())
	}
}

/// Configuration of all PCI Express controllers of the platform. Fixed before
/// any root bridge is described and never mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformConfig {
	pub slots: [ControllerSlot; ControllerKind::COUNT],
	pub windows: ResourceWindows,
}

impl PlatformConfig {
	/// RK356x memory map with every controller disabled. Boards enable the
	/// controllers they wire up with [`Self::with_enabled`].
	pub const fn rk356x() -> Self {
		Self {
			slots: [
				ControllerSlot {
					enabled: false,
					apb_base: 0xFE26_0000,
					dbi_base: 0x3_C000_0000,
					segment: PCIE_SEGMENT_PCIE20,
					bus_base: 0x3_0000_0000,
					num_lanes: 1,
					link_speed: LinkSpeed::Gen2,
					power_gpio: GpioPin::new(0, 22),
					reset_gpio: GpioPin::new(2, 28),
				},
				ControllerSlot {
					enabled: false,
					apb_base: 0xFE27_0000,
					dbi_base: 0x3_C040_0000,
					segment: PCIE_SEGMENT_PCIE30X1,
					bus_base: 0x3_4000_0000,
					num_lanes: 1,
					link_speed: LinkSpeed::Gen3,
					power_gpio: GpioPin::new(0, 22),
					reset_gpio: GpioPin::new(0, 20),
				},
				ControllerSlot {
					enabled: false,
					apb_base: 0xFE28_0000,
					dbi_base: 0x3_C080_0000,
					segment: PCIE_SEGMENT_PCIE30X2,
					bus_base: 0x3_8000_0000,
					num_lanes: 2,
					link_speed: LinkSpeed::Gen3,
					power_gpio: GpioPin::new(0, 22),
					reset_gpio: GpioPin::new(2, 30),
				},
			],
			windows: ResourceWindows {
				bus_min: 0x00,
				bus_max: 0xFF,
				io_base: 0x0000,
				io_size: 0x1_0000,
				io_translation: 0x3_3FFF_0000,
				mmio32_base: 0xF400_0000,
				mmio32_size: 0x0200_0000,
				mmio64_base: 0x3_0010_0000,
				mmio64_size: 0x3FEF_0000,
			},
		}
	}

	#[must_use]
	pub fn with_enabled(mut self, kind: ControllerKind, enabled: bool) -> Self {
		self.slots[kind.index()].enabled = enabled;
		self
	}

	pub fn slot(&self, kind: ControllerKind) -> &ControllerSlot {
		&self.slots[kind.index()]
	}

	pub fn slot_mut(&mut self, kind: ControllerKind) -> &mut ControllerSlot {
		&mut self.slots[kind.index()]
	}

	pub fn enabled(&self) -> ControllerSet {
		ControllerKind::ALL
			.into_iter()
			.filter(|&kind| self.slot(kind).enabled)
			.fold(ControllerSet::empty(), |set, kind| set | kind.flag())
	}

	/// Checks that the enabled controllers can be described as a consistent
	/// root bridge table.
	pub fn validate(&self) -> Result<(), Error> {
		self.windows.validate()?;
		let enabled = self.enabled();
		for kind in enabled.kinds() {
			let slot = self.slot(kind);
			if !matches!(slot.num_lanes, 1 | 2 | 4) {
				return Err(Error::InvalidLaneCount {
					kind,
					lanes: slot.num_lanes,
				});
			}
			if let Some(other) = enabled
				.kinds()
				.take_while(|&other| other != kind)
				.find(|&other| self.slot(other).segment == slot.segment)
			{
				return Err(Error::DuplicateSegment {
					segment: slot.segment,
					first: other,
					second: kind,
				});
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rk356x_defaults() {
		let config = PlatformConfig::rk356x();
		assert!(config.enabled().is_empty());
		assert_eq!(config.slot(ControllerKind::Pcie2x1).segment, PCIE_SEGMENT_PCIE20);
		assert_eq!(config.slot(ControllerKind::Pcie3x1).segment, PCIE_SEGMENT_PCIE30X1);
		assert_eq!(config.slot(ControllerKind::Pcie3x2).segment, PCIE_SEGMENT_PCIE30X2);
		assert_eq!(config.slot(ControllerKind::Pcie3x2).num_lanes, 2);
		assert_eq!(config.validate(), Ok(()));
	}

	#[test]
	fn enabled_set_follows_slots() {
		let config = PlatformConfig::rk356x()
			.with_enabled(ControllerKind::Pcie3x2, true)
			.with_enabled(ControllerKind::Pcie2x1, true);
		let enabled = config.enabled();
		assert_eq!(enabled, ControllerSet::PCIE2X1 | ControllerSet::PCIE3X2);
		assert_eq!(enabled.count(), 2);
		let mut kinds = enabled.kinds();
		assert_eq!(kinds.next(), Some(ControllerKind::Pcie2x1));
		assert_eq!(kinds.next(), Some(ControllerKind::Pcie3x2));
		assert_eq!(kinds.next(), None);
	}

	#[test]
	fn kind_from_raw() {
		assert_eq!(ControllerKind::try_from(2_u8).ok(), Some(ControllerKind::Pcie3x2));
		assert!(ControllerKind::try_from(3_u8).is_err());
		for kind in ControllerKind::ALL {
			assert_eq!(ControllerKind::try_from(kind.index() as u8).ok(), Some(kind));
		}
	}

	#[test]
	fn link_speed_from_raw() {
		assert_eq!(LinkSpeed::try_from(2_u32).ok(), Some(LinkSpeed::Gen2));
		assert!(LinkSpeed::try_from(0_u32).is_err());
		assert!(LinkSpeed::try_from(4_u32).is_err());
	}

	#[test]
	fn duplicate_segment_rejected() {
		let mut config = PlatformConfig::rk356x()
			.with_enabled(ControllerKind::Pcie2x1, true)
			.with_enabled(ControllerKind::Pcie3x2, true);
		config.slot_mut(ControllerKind::Pcie3x2).segment = PCIE_SEGMENT_PCIE20;
		assert_eq!(
			config.validate(),
			Err(Error::DuplicateSegment {
				segment: PCIE_SEGMENT_PCIE20,
				first: ControllerKind::Pcie2x1,
				second: ControllerKind::Pcie3x2,
			})
		);

		// a disabled controller may share a segment
		config.slot_mut(ControllerKind::Pcie2x1).enabled = false;
		assert_eq!(config.validate(), Ok(()));
	}

	#[test]
	fn invalid_windows_rejected() {
		let mut config = PlatformConfig::rk356x();
		config.windows.bus_min = 2;
		config.windows.bus_max = 1;
		assert_eq!(config.validate(), Err(Error::InvalidWindow("bus number range")));

		let mut config = PlatformConfig::rk356x();
		config.windows.mmio32_base = 0xFFFF_0000;
		config.windows.mmio32_size = 0x2_0000;
		assert_eq!(
			config.validate(),
			Err(Error::InvalidWindow("32-bit memory window"))
		);

		let mut config = PlatformConfig::rk356x();
		config.windows.io_size = 0;
		assert_eq!(config.validate(), Err(Error::InvalidWindow("I/O window")));
	}

	#[test]
	fn invalid_lane_count_rejected() {
		let mut config = PlatformConfig::rk356x().with_enabled(ControllerKind::Pcie3x1, true);
		config.slot_mut(ControllerKind::Pcie3x1).num_lanes = 3;
		assert_eq!(
			config.validate(),
			Err(Error::InvalidLaneCount {
				kind: ControllerKind::Pcie3x1,
				lanes: 3,
			})
		);
	}
}
