//! Rule document rendering.
//!
//! Turns semantic patterns into markdown rule documents with YAML
//! front-matter.

mod rule_renderer;

pub use rule_renderer::{
    MAX_EVIDENCE_LISTED, RenderedRule, instruction, parse_rule_front_matter, render_rule,
};
