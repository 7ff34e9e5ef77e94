//! Pipeline document tree, runtime-input sentinel, and YAML/JSON codec.
//!
//! Documents are a tagged union ([`Node`]) of scalars, lists, parallel groups
//! and ordered sub-trees. Placeholders are [`Scalar::Input`] leaves holding a
//! parsed [`RuntimeInput`], so no legitimate value (the empty string included)
//! can be mistaken for one.
//!
//! # Example
//! ```
//! use runin_document::Node;
//!
//! let doc = Node::from_yaml_str("deploy:\n  namespace: <+input>\n").unwrap();
//! assert!(doc.has_placeholder());
//! assert_eq!(doc.leaves()[0].0.to_string(), "deploy.namespace");
//! ```

pub mod codec;
pub mod identity;
pub mod input;
pub mod node;
pub mod path;

pub use codec::PARALLEL_KEY;
pub use identity::{find_aligned, find_element, identity_of, Alignment, ElementKey, IdentityFields};
pub use input::{Modifier, RuntimeInput, INPUT_SENTINEL};
pub use node::{Fields, Node, Scalar};
pub use path::{FieldPath, PathSegment};
