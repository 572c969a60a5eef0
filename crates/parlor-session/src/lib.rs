pub mod context;
pub mod error;
pub mod machine;
pub mod nav;
pub mod notify;
pub mod presence;
pub mod reconcile;
pub mod render;
pub mod slug;

pub use error::SessionError;
pub use machine::{Command, Phase, Session};
pub use nav::NavigationSignal;
pub use render::RenderSurface;
