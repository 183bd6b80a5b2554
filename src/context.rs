// Per-request correlation identifiers. Populated by the request-context
// middleware and carried through the workflows into published event headers.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: Option<String>, trace_id: Option<String>) -> Self {
        Self {
            request_id,
            trace_id,
        }
    }
}
