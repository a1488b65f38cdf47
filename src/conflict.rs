//! Decoding of the resource conflict report of the PCI bus allocation layer.
//!
//! The report is a sequence of QWORD address space descriptors, one group per
//! root bridge. Each group is closed by an end tag descriptor, and one more end
//! tag closes the whole report.

use core::{
	fmt::{self, Display, Formatter},
	iter::FusedIterator,
	mem::size_of,
};

use log::{debug, error};
use num_enum::TryFromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::{
	byteorder::little_endian::{U16, U64},
	FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

pub const ACPI_ADDRESS_SPACE_DESCRIPTOR: u8 = 0x8A;
pub const ACPI_END_TAG_DESCRIPTOR: u8 = 0x79;

/// Memory resource specific flag: cacheable and prefetchable.
pub const MEMORY_CACHEABLE_PREFETCHABLE: u8 = 0x06;

/// Value of [`AddressSpaceDescriptor::res_type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ResourceType {
	Mem,
	Io,
	Bus,
}

impl ResourceType {
	pub const fn name(self) -> &'static str {
		match self {
			Self::Mem => "Mem",
			Self::Io => "I/O",
			Self::Bus => "Bus",
		}
	}
}

impl Display for ResourceType {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// ACPI QWORD address space descriptor.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct AddressSpaceDescriptor {
	pub desc: u8,
	/// Length of the descriptor after this field.
	pub len: U16,
	pub res_type: u8,
	pub gen_flag: u8,
	pub specific_flag: u8,
	pub addr_space_granularity: U64,
	pub addr_range_min: U64,
	/// Alignment requirement of a submitted resource.
	pub addr_range_max: U64,
	pub addr_translation_offset: U64,
	pub addr_len: U64,
}

const_assert_eq!(size_of::<AddressSpaceDescriptor>(), 46);

impl AddressSpaceDescriptor {
	pub const fn new(res_type: ResourceType, length: u64, range_max: u64) -> Self {
		Self {
			desc: ACPI_ADDRESS_SPACE_DESCRIPTOR,
			len: U16::new((size_of::<Self>() - 3) as u16),
			res_type: res_type as u8,
			gen_flag: 0,
			specific_flag: 0,
			addr_space_granularity: U64::new(0),
			addr_range_min: U64::new(0),
			addr_range_max: U64::new(range_max),
			addr_translation_offset: U64::new(0),
			addr_len: U64::new(length),
		}
	}

	#[must_use]
	pub const fn with_granularity(mut self, granularity: u64) -> Self {
		self.addr_space_granularity = U64::new(granularity);
		self
	}

	#[must_use]
	pub const fn with_specific_flag(mut self, specific_flag: u8) -> Self {
		self.specific_flag = specific_flag;
		self
	}
}

/// ACPI end tag descriptor.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct EndTagDescriptor {
	pub desc: u8,
	pub checksum: u8,
}

const_assert_eq!(size_of::<EndTagDescriptor>(), 2);

impl EndTagDescriptor {
	pub const fn new() -> Self {
		Self {
			desc: ACPI_END_TAG_DESCRIPTOR,
			checksum: 0,
		}
	}
}

impl Default for EndTagDescriptor {
	fn default() -> Self {
		Self::new()
	}
}

/// Cursor over a descriptor byte stream.
#[derive(Clone, Debug)]
pub struct DescriptorReader<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> DescriptorReader<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		Self { data, pos: 0 }
	}

	pub fn at_end(&self) -> bool {
		self.pos >= self.data.len()
	}

	pub fn position(&self) -> usize {
		self.pos
	}

	/// Tag byte of the next descriptor.
	pub fn peek_tag(&self) -> Option<u8> {
		self.data.get(self.pos).copied()
	}

	/// Reads the next fixed-size descriptor. Returns `None` if fewer than
	/// `size_of::<T>()` bytes are left.
	pub fn read<T: FromBytes + KnownLayout + Immutable + Unaligned>(&mut self) -> Option<&'a T> {
		let (record, _) = T::ref_from_prefix(self.data.get(self.pos..)?).ok()?;
		self.pos += size_of::<T>();
		Some(record)
	}
}

/// Iterates over the per root bridge groups of a conflict report.
///
/// # Panics
/// Advancing panics if a group is not closed by an end tag or a descriptor is
/// cut short by the end of the buffer.
#[derive(Clone, Debug)]
pub struct ConflictIter<'a> {
	reader: DescriptorReader<'a>,
	next_index: usize,
}

impl<'a> ConflictIter<'a> {
	pub fn new(configuration: &'a [u8]) -> Self {
		Self {
			reader: DescriptorReader::new(configuration),
			next_index: 0,
		}
	}
}

impl<'a> Iterator for ConflictIter<'a> {
	type Item = BridgeConflicts<'a>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.reader.peek_tag() != Some(ACPI_ADDRESS_SPACE_DESCRIPTOR) {
			return None;
		}
		let start = self.reader.position();
		while self.reader.peek_tag() == Some(ACPI_ADDRESS_SPACE_DESCRIPTOR) {
			self.reader
				.read::<AddressSpaceDescriptor>()
				.expect("truncated address space descriptor");
		}
		let end = self.reader.position();
		let end_tag = self.reader.read::<EndTagDescriptor>();
		assert!(
			end_tag.is_some_and(|tag| tag.desc == ACPI_END_TAG_DESCRIPTOR),
			"root bridge resources not terminated by an end tag"
		);

		let data = self.reader.data;
		let index = self.next_index;
		self.next_index += 1;
		Some(BridgeConflicts {
			index,
			descriptors: &data[start..end],
		})
	}
}

impl FusedIterator for ConflictIter<'_> {}

/// Unsatisfied resources of one root bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeConflicts<'a> {
	/// Position of the group in the report.
	pub index: usize,
	descriptors: &'a [u8],
}

impl<'a> BridgeConflicts<'a> {
	pub fn entries(&self) -> ConflictEntries<'a> {
		ConflictEntries(DescriptorReader::new(self.descriptors))
	}

	pub fn descriptor_count(&self) -> usize {
		self.descriptors.len() / size_of::<AddressSpaceDescriptor>()
	}
}

impl Display for BridgeConflicts<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "RootBridge[{}]:", self.index)
	}
}

/// Iterates over the descriptors of a [`BridgeConflicts`] group.
///
/// # Panics
/// Panics on a resource type other than memory, I/O or bus number.
#[derive(Clone, Debug)]
pub struct ConflictEntries<'a>(DescriptorReader<'a>);

impl Iterator for ConflictEntries<'_> {
	type Item = ConflictEntry;

	fn next(&mut self) -> Option<Self::Item> {
		self.0.read::<AddressSpaceDescriptor>().map(ConflictEntry::from)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let len = (self.0.data.len() - self.0.pos) / size_of::<AddressSpaceDescriptor>();
		(len, Some(len))
	}
}

impl ExactSizeIterator for ConflictEntries<'_> {}

impl FusedIterator for ConflictEntries<'_> {}

/// A resource request that could not be satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConflictEntry {
	pub resource_type: ResourceType,
	pub length: u64,
	/// Maximum address of the range; the alignment of a submitted request.
	pub range_max: u64,
	/// Only present for memory resources.
	pub memory: Option<MemoryFlags>,
}

impl ConflictEntry {
	pub fn is_prefetchable(&self) -> bool {
		self.memory.is_some_and(|memory| memory.is_prefetchable())
	}
}

impl From<&AddressSpaceDescriptor> for ConflictEntry {
	fn from(desc: &AddressSpaceDescriptor) -> Self {
		let resource_type =
			ResourceType::try_from(desc.res_type).expect("unknown address space resource type");
		Self {
			resource_type,
			length: desc.addr_len.get(),
			range_max: desc.addr_range_max.get(),
			memory: (resource_type == ResourceType::Mem).then(|| MemoryFlags {
				granularity: desc.addr_space_granularity.get(),
				specific_flag: desc.specific_flag,
			}),
		}
	}
}

impl Display for ConflictEntry {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(
			f,
			" {}: Length/Alignment = {:#x} / {:#x}",
			self.resource_type, self.length, self.range_max
		)
	}
}

/// Memory specific part of a [`ConflictEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryFlags {
	/// 32 or 64.
	pub granularity: u64,
	pub specific_flag: u8,
}

impl MemoryFlags {
	pub fn is_prefetchable(&self) -> bool {
		self.specific_flag & MEMORY_CACHEABLE_PREFETCHABLE != 0
	}
}

impl Display for MemoryFlags {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"     Granularity/SpecificFlag = {} / {:02x}{}",
			self.granularity,
			self.specific_flag,
			if self.is_prefetchable() {
				" (Prefetchable)"
			} else {
				""
			}
		)
	}
}

/// Opaque handle of the host bridge a conflict report belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostBridgeHandle(pub usize);

/// Decodes a conflict report without logging it.
pub fn decode_conflicts(configuration: &[u8]) -> ConflictIter<'_> {
	ConflictIter::new(configuration)
}

/// Logs the resources the bus allocation layer could not assign.
///
/// # Panics
/// Panics if the report is malformed, see [`ConflictIter`] and
/// [`ConflictEntries`].
pub fn report_resource_conflict(host_bridge: HostBridgeHandle, configuration: &[u8]) {
	error!("PciHostBridge: Resource conflict happens!");
	debug!("host bridge {:#x}, {} byte report", host_bridge.0, configuration.len());
	for bridge in decode_conflicts(configuration) {
		error!("{bridge}");
		for entry in bridge.entries() {
			error!("{entry}");
			if let Some(memory) = entry.memory {
				error!("{memory}");
			}
		}
	}
}
