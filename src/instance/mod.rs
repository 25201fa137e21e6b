//! Instance management.
//!
//! Layout of one instance:
//! - instances/{name}/odoo.conf - generated Odoo configuration
//! - instances/{name}/addons/ - instance-specific addons
//! - instances/{name}/logs/ - odoo.log and launcher.log
//! - instances/{name}/data/ - Odoo filestore and sessions

mod conf;
mod factory;

pub use conf::{conf_value, OdooConf};
pub use factory::{CreateInstanceRequest, InstanceFactory};
