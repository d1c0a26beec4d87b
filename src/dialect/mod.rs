mod descriptor;
mod literal;
mod query;
mod renderer;
pub mod templates;

pub use descriptor::*;
pub use literal::*;
pub use query::*;
pub use renderer::*;
