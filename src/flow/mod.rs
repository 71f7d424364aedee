//! Flow definitions: the extension point user code implements.

mod definition;

pub use definition::{Flow, FlowElementStream, FlowError, FlowRunContext};
