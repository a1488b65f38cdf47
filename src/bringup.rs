//! Bring-up of the enabled PCI Express controllers.

use log::{debug, error};

use crate::{
	error::{Error, HostInitError},
	platform::{ControllerKind, ControllerSet, GpioPin, LinkSpeed, PlatformConfig},
};

/// Everything the hardware bring-up of one controller needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostInitParams {
	pub kind: ControllerKind,
	pub apb_base: u64,
	pub dbi_base: u64,
	pub segment: u32,
	pub bus_base: u64,
	pub num_lanes: u32,
	pub link_speed: LinkSpeed,
	pub power_gpio: GpioPin,
	pub reset_gpio: GpioPin,
}

impl HostInitParams {
	pub fn new(config: &PlatformConfig, kind: ControllerKind) -> Self {
		let slot = config.slot(kind);
		Self {
			kind,
			apb_base: slot.apb_base,
			dbi_base: slot.dbi_base,
			segment: slot.segment,
			bus_base: slot.bus_base,
			num_lanes: slot.num_lanes,
			link_speed: slot.link_speed,
			power_gpio: slot.power_gpio,
			reset_gpio: slot.reset_gpio,
		}
	}
}

/// Hardware bring-up of a single controller: register programming, clocks,
/// power and reset GPIOs, link training.
///
/// Blocks until the link is up or has failed to come up.
pub trait PcieHostInit {
	fn initialize(&mut self, params: &HostInitParams) -> Result<(), HostInitError>;
}

impl<T: PcieHostInit + ?Sized> PcieHostInit for &mut T {
	#[inline]
	fn initialize(&mut self, params: &HostInitParams) -> Result<(), HostInitError> {
		(**self).initialize(params)
	}
}

/// Brings up every enabled controller in priority order and returns the set of
/// activated controllers.
///
/// The first failure aborts the whole sequence; controllers after the failing
/// one are not touched.
pub fn enable_controllers<I: PcieHostInit + ?Sized>(
	config: &PlatformConfig,
	init: &mut I,
) -> Result<ControllerSet, Error> {
	let mut activated = ControllerSet::empty();
	for kind in config.enabled().kinds() {
		let params = HostInitParams::new(config, kind);
		debug!(
			"initializing PCIe {kind}: apb {:#x}, dbi {:#x}, segment {}, x{} {:?}",
			params.apb_base, params.dbi_base, params.segment, params.num_lanes, params.link_speed
		);
		if let Err(source) = init.initialize(&params) {
			error!("failed to initialize PCIe host {kind}: {source}");
			return Err(Error::HardwareInit { kind, source });
		}
		activated |= kind.flag();
	}
	Ok(activated)
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	/// Records every bring-up request and fails the configured controllers.
	#[derive(Default)]
	pub(crate) struct MockHostInit {
		pub(crate) calls: Vec<HostInitParams>,
		pub(crate) failing: ControllerSet,
	}

	impl MockHostInit {
		pub(crate) fn failing(failing: ControllerSet) -> Self {
			Self {
				calls: Vec::new(),
				failing,
			}
		}

		pub(crate) fn kinds(&self) -> Vec<ControllerKind> {
			self.calls.iter().map(|params| params.kind).collect()
		}
	}

	impl PcieHostInit for MockHostInit {
		fn initialize(&mut self, params: &HostInitParams) -> Result<(), HostInitError> {
			self.calls.push(*params);
			if self.failing.contains(params.kind.flag()) {
				Err(HostInitError::LinkDown)
			} else {
				Ok(())
			}
		}
	}

	#[test]
	fn nothing_enabled() {
		let mut init = MockHostInit::default();
		let activated = enable_controllers(&PlatformConfig::rk356x(), &mut init).unwrap();
		assert!(activated.is_empty());
		assert!(init.calls.is_empty());
	}

	#[test]
	fn only_enabled_controllers_brought_up() {
		let config = PlatformConfig::rk356x()
			.with_enabled(ControllerKind::Pcie3x1, true)
			.with_enabled(ControllerKind::Pcie3x2, true);
		let mut init = MockHostInit::default();
		let activated = enable_controllers(&config, &mut init).unwrap();
		assert_eq!(activated, ControllerSet::PCIE3X1 | ControllerSet::PCIE3X2);
		assert_eq!(
			init.kinds(),
			[ControllerKind::Pcie3x1, ControllerKind::Pcie3x2]
		);
	}

	#[test]
	fn params_come_from_slot() {
		let config = PlatformConfig::rk356x().with_enabled(ControllerKind::Pcie3x2, true);
		let mut init = MockHostInit::default();
		enable_controllers(&config, &mut init).unwrap();

		let slot = config.slot(ControllerKind::Pcie3x2);
		let params = &init.calls[0];
		assert_eq!(params.apb_base, slot.apb_base);
		assert_eq!(params.dbi_base, slot.dbi_base);
		assert_eq!(params.segment, slot.segment);
		assert_eq!(params.bus_base, slot.bus_base);
		assert_eq!(params.num_lanes, 2);
		assert_eq!(params.link_speed, LinkSpeed::Gen3);
		assert_eq!(params.power_gpio, slot.power_gpio);
		assert_eq!(params.reset_gpio, slot.reset_gpio);
	}

	#[test]
	fn failure_stops_sequence() {
		let config = PlatformConfig::rk356x()
			.with_enabled(ControllerKind::Pcie2x1, true)
			.with_enabled(ControllerKind::Pcie3x1, true)
			.with_enabled(ControllerKind::Pcie3x2, true);
		let mut init = MockHostInit::failing(ControllerSet::PCIE3X1);
		assert_eq!(
			enable_controllers(&config, &mut init),
			Err(Error::HardwareInit {
				kind: ControllerKind::Pcie3x1,
				source: HostInitError::LinkDown,
			})
		);
		assert_eq!(
			init.kinds(),
			[ControllerKind::Pcie2x1, ControllerKind::Pcie3x1]
		);
	}
}
