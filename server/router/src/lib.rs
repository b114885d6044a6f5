pub mod bus;
pub mod call_tracker;
pub mod hub;
pub mod parrot;
pub mod registration;
pub mod subscriptions;

pub use bus::{Bus, Topic};
pub use call_tracker::{CallTracker, DefaultCallTracker, CALL_IDLE_TIMEOUT};
pub use hub::RoutingHub;
pub use parrot::ParrotService;
pub use registration::{RegistrationTable, ServerRole};
pub use subscriptions::SubscriptionManager;
