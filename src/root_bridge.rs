//! Root bridge table handed to the generic PCI bus allocation layer.

use alloc::{boxed::Box, vec::Vec};
use core::slice;

use bitflags::bitflags;
use log::{debug, error, info, trace};

use crate::{
	bringup::{enable_controllers, PcieHostInit},
	device_path::RootBridgeDevicePath,
	error::Error,
	platform::{ControllerSet, PlatformConfig, ResourceWindows},
};

bitflags! {
	/// PCI I/O attributes a root bridge supports or has enabled.
	#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
	pub struct PciAttributes: u64 {
		const ISA_MOTHERBOARD_IO = 0x0001;
		const ISA_IO = 0x0002;
		const VGA_PALETTE_IO = 0x0004;
		const VGA_MEMORY = 0x0008;
		const VGA_IO = 0x0010;
		const IDE_PRIMARY_IO = 0x0020;
		const IDE_SECONDARY_IO = 0x0040;
		const MEMORY_WRITE_COMBINE = 0x0080;
		const IO = 0x0100;
		const MEMORY = 0x0200;
		const BUS_MASTER = 0x0400;
		const MEMORY_CACHED = 0x0800;
		const MEMORY_DISABLE = 0x1000;
		const EMBEDDED_DEVICE = 0x2000;
		const EMBEDDED_ROM = 0x4000;
		const DUAL_ADDRESS_CYCLE = 0x8000;
		const ISA_IO_16 = 0x1_0000;
		const VGA_PALETTE_IO_16 = 0x2_0000;
		const VGA_IO_16 = 0x4_0000;
	}
}

bitflags! {
	/// How the host bridge allocates memory BARs.
	#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
	pub struct AllocationAttributes: u64 {
		/// Prefetchable BARs are placed in the non-prefetchable windows.
		const COMBINE_MEM_PMEM = 1;
		/// 64-bit BARs may be placed above 4 GiB.
		const MEM64_DECODE = 2;
	}
}

/// Address range of one resource type. Empty when `base > limit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Aperture {
	pub base: u64,
	/// Inclusive.
	pub limit: u64,
	/// Device address = host address + translation.
	pub translation: u64,
}

impl Aperture {
	pub const EMPTY: Self = Self {
		base: u64::MAX,
		limit: 0,
		translation: 0,
	};

	pub const fn new(base: u64, limit: u64) -> Self {
		Self {
			base,
			limit,
			translation: 0,
		}
	}

	pub const fn from_size(base: u64, size: u64) -> Self {
		Self::new(base, base.wrapping_add(size).wrapping_sub(1))
	}

	/// `host_base` is the CPU address the aperture's base is mapped at.
	#[must_use]
	pub const fn with_host_base(mut self, host_base: u64) -> Self {
		self.translation = host_base.wrapping_neg();
		self
	}

	pub const fn is_empty(&self) -> bool {
		self.base > self.limit
	}

	pub const fn size(&self) -> u64 {
		if self.is_empty() {
			0
		} else {
			self.limit - self.base + 1
		}
	}

	pub const fn contains(&self, addr: u64) -> bool {
		self.base <= addr && addr <= self.limit
	}
}

/// Attributes and resource windows shared by all root bridges of the
/// platform. Every [`RootBridge`] starts as a copy of the same template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootBridgeResources {
	pub supports: PciAttributes,
	pub attributes: PciAttributes,
	pub dma_above_4g: bool,
	pub no_extended_config_space: bool,
	pub resource_assigned: bool,
	pub allocation_attributes: AllocationAttributes,
	pub bus: Aperture,
	pub io: Aperture,
	pub mem: Aperture,
	pub mem_above_4g: Aperture,
	pub p_mem: Aperture,
	pub p_mem_above_4g: Aperture,
}

impl RootBridgeResources {
	const LEGACY_ATTRIBUTES: PciAttributes = PciAttributes::IDE_PRIMARY_IO
		.union(PciAttributes::IDE_SECONDARY_IO)
		.union(PciAttributes::ISA_IO_16)
		.union(PciAttributes::ISA_MOTHERBOARD_IO)
		.union(PciAttributes::VGA_MEMORY)
		.union(PciAttributes::VGA_IO_16)
		.union(PciAttributes::VGA_PALETTE_IO_16);

	pub fn from_windows(windows: &ResourceWindows) -> Self {
		Self {
			supports: Self::LEGACY_ATTRIBUTES,
			attributes: Self::LEGACY_ATTRIBUTES,
			dma_above_4g: true,
			no_extended_config_space: false,
			resource_assigned: false,
			allocation_attributes: AllocationAttributes::COMBINE_MEM_PMEM
				| AllocationAttributes::MEM64_DECODE,
			bus: Aperture::new(windows.bus_min.into(), windows.bus_max.into()),
			io: Aperture::from_size(windows.io_base, windows.io_size)
				.with_host_base(windows.io_translation),
			mem: Aperture::from_size(windows.mmio32_base.into(), windows.mmio32_size.into()),
			mem_above_4g: Aperture::from_size(windows.mmio64_base, windows.mmio64_size),
			// no separate ranges for prefetchable BARs
			p_mem: Aperture::EMPTY,
			p_mem_above_4g: Aperture::EMPTY,
		}
	}
}

/// One entry of the root bridge table.
#[derive(Debug, PartialEq, Eq)]
pub struct RootBridge {
	pub segment: u32,
	pub resources: RootBridgeResources,
	device_path: Box<RootBridgeDevicePath>,
}

impl RootBridge {
	fn new(uid: u32, template: &RootBridgeResources) -> Self {
		Self {
			segment: 0,
			resources: template.clone(),
			device_path: Box::new(RootBridgeDevicePath::new(uid)),
		}
	}

	pub fn uid(&self) -> u32 {
		self.device_path.uid()
	}

	pub fn device_path(&self) -> &RootBridgeDevicePath {
		&self.device_path
	}
}

/// Owned table of root bridges. Ordered by UID.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RootBridgeTable {
	bridges: Vec<RootBridge>,
}

impl RootBridgeTable {
	pub const fn empty() -> Self {
		Self {
			bridges: Vec::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.bridges.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bridges.is_empty()
	}

	pub fn iter(&self) -> slice::Iter<'_, RootBridge> {
		self.bridges.iter()
	}

	pub fn as_slice(&self) -> &[RootBridge] {
		&self.bridges
	}

	/// Hands the bridges over to the bus allocation layer.
	pub fn into_vec(self) -> Vec<RootBridge> {
		self.bridges
	}

	/// Frees every bridge's device path, then the table itself.
	pub fn release(self) {
		trace!("releasing {} root bridges", self.len());
		drop(self.bridges);
	}
}

impl<'a> IntoIterator for &'a RootBridgeTable {
	type Item = &'a RootBridge;
	type IntoIter = slice::Iter<'a, RootBridge>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

/// Builds the [`RootBridgeTable`] for a fixed [`PlatformConfig`].
#[derive(Clone, Debug)]
pub struct RootBridgeTableBuilder<'a> {
	config: &'a PlatformConfig,
	template: RootBridgeResources,
}

impl<'a> RootBridgeTableBuilder<'a> {
	pub fn new(config: &'a PlatformConfig) -> Self {
		Self {
			config,
			template: RootBridgeResources::from_windows(&config.windows),
		}
	}

	pub fn template(&self) -> &RootBridgeResources {
		&self.template
	}

	/// Brings up the enabled controllers and describes one root bridge per
	/// controller. Any bring-up failure fails the whole table.
	pub fn try_build<I: PcieHostInit + ?Sized>(
		&self,
		init: &mut I,
	) -> Result<RootBridgeTable, Error> {
		self.config.validate()?;
		let activated = enable_controllers(self.config, init)?;

		let count = self.config.enabled().count();
		let mut consumed = ControllerSet::empty();
		let mut bridges = Vec::with_capacity(count);
		for uid in 0..count {
			let mut bridge = RootBridge::new(uid as u32, &self.template);
			// Segments are handed out in controller priority order, each
			// controller at most once.
			if let Some(kind) = (activated - consumed).kinds().next() {
				consumed |= kind.flag();
				bridge.segment = self.config.slot(kind).segment;
			}
			debug!(
				"root bridge {}: segment {}, {}",
				bridge.uid(),
				bridge.segment,
				bridge.device_path()
			);
			bridges.push(bridge);
		}
		info!("PCIe: {} root bridges", bridges.len());
		Ok(RootBridgeTable { bridges })
	}

	/// Like [`Self::try_build`], but reports failure as an empty table.
	pub fn build<I: PcieHostInit + ?Sized>(&self, init: &mut I) -> RootBridgeTable {
		self.try_build(init).unwrap_or_else(|err| {
			error!("PCIe: no root bridges: {err}");
			RootBridgeTable::empty()
		})
	}
}
