pub mod audience;
pub mod csp;
pub mod hashes;
pub mod options;
pub mod resolver;

pub use audience::{Audience, ClientContext};
pub use hashes::{HtmlInlineBlocks, inject_hashes};
pub use options::{HeaderOptions, OptionsError, SupportedHeader};
pub use resolver::{ResolvedHeaderEntry, ResolvedHeaders, resolve};
