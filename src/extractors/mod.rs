pub mod principal;
pub mod request_values;

pub use principal::{CurrentPrincipal, HeaderPrincipalProvider, Principal, PrincipalProvider};
pub use request_values::RequestValues;
