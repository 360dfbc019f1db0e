//! Built-in peripheral modules.
//!
//! Every module exposes `NAME` and an `init` entry point that registers its
//! descriptor. [`PROVIDERS`] is the table the [`ModuleLoader`] walks.
//!
//! [`ModuleLoader`]: crate::registry::ModuleLoader

pub mod clocker;
pub mod eth_frame;
pub mod ethernet;
pub mod gmii_ethernet;
pub mod gpio;
pub mod link;
pub mod serial;
pub mod serial2console;
pub mod serial2tcp;
pub mod simctrl;
pub mod spdeeprom;
pub mod xgmii_ethernet;

use crate::registry::ModuleProvider;

/// Every compiled-in module.
pub static PROVIDERS: &[ModuleProvider] = &[
    ModuleProvider {
        name: clocker::NAME,
        init: clocker::init,
    },
    ModuleProvider {
        name: serial2console::NAME,
        init: serial2console::init,
    },
    ModuleProvider {
        name: serial2tcp::NAME,
        init: serial2tcp::init,
    },
    ModuleProvider {
        name: ethernet::NAME,
        init: ethernet::init,
    },
    ModuleProvider {
        name: gmii_ethernet::NAME,
        init: gmii_ethernet::init,
    },
    ModuleProvider {
        name: xgmii_ethernet::NAME,
        init: xgmii_ethernet::init,
    },
    ModuleProvider {
        name: spdeeprom::NAME,
        init: spdeeprom::init,
    },
    ModuleProvider {
        name: gpio::NAME,
        init: gpio::init,
    },
    ModuleProvider {
        name: simctrl::NAME,
        init: simctrl::init,
    },
];
