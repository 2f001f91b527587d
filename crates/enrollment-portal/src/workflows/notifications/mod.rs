//! Real-time status notifications: client directory, dispatcher, e-mail, and
//! the websocket channel.

pub mod directory;
pub mod dispatcher;
pub mod email;
pub mod events;
pub mod socket;

pub use directory::{
    ClientDirectory, ConnectionHandle, ConnectionId, DeliveryFailure, Registration, Subscription,
};
pub use dispatcher::{DispatchReceipt, EmailDelivery, NotificationDispatcher};
pub use email::{EmailComposer, EmailError, StatusEmail, StatusMailer};
pub use events::{ClientMessage, ServerMessage, StatusEvent};
pub use socket::notification_router;
