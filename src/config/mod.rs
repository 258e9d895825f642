pub mod types;
pub mod loader;
pub mod validator;
pub mod resolved;
pub mod computed;
pub mod settings;

pub use types::*;
pub use loader::*;
pub use validator::*;
pub use resolved::*;
pub use computed::*;
pub use settings::*;
