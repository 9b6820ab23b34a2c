pub mod error;
pub mod grammar;
pub mod matcher;
pub mod resolve;
pub mod split;
pub mod synth;

pub use error::SelectorError;
pub use grammar::{parse_chain, Selector, SelectorChain, Term, TermKey, TermValue};
pub use matcher::{candidate_set, node_matches_term};
pub use resolve::{
    find_selector_chain_match, resolve_selector_chain, Resolution, ResolveOptions,
    SelectorDiagnostic,
};
pub use split::split_selector_from_args;
pub use synth::{build_selector_chain_for_node, SynthAction};
