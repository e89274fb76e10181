//! Bulk convenience operations layered over the core.
//!
//! Thin composition: build N transfers, register them on a fresh
//! [`Multi`], perform once. The per-item hook fires from the completion
//! dispatcher, so each transfer's success/failure contract is unchanged.

use http::Method;
use std::cell::RefCell;
use std::rc::Rc;

use crate::base::{MultiError, TransferError};
use crate::multi::Multi;
use crate::transfer::{Transfer, TransferHandler};

/// One item of a bulk POST: target URL plus form fields, sent
/// form-urlencoded.
#[derive(Debug, Clone)]
pub struct PostSpec {
    pub url: String,
    pub fields: Vec<(String, String)>,
}

impl PostSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Forwards completions (success or failure alike) to a hook shared by
/// the whole batch.
struct BatchHandler<F: FnMut(&Transfer)> {
    hook: Rc<RefCell<F>>,
}

impl<F: FnMut(&Transfer)> TransferHandler for BatchHandler<F> {
    fn on_success(&mut self, transfer: &Transfer) {
        (self.hook.borrow_mut())(transfer);
    }

    fn on_failure(&mut self, transfer: &Transfer, _error: &TransferError) {
        (self.hook.borrow_mut())(transfer);
    }
}

/// Fetch every URL concurrently; `each` is invoked once per completed
/// transfer, as it completes.
pub fn get<I, S, F>(urls: I, each: F) -> Result<(), MultiError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: FnMut(&Transfer) + 'static,
{
    let hook = Rc::new(RefCell::new(each));
    let mut multi = Multi::new()?;
    for url in urls {
        let transfer = Transfer::new(url);
        transfer.set_handler(BatchHandler { hook: hook.clone() });
        multi.add(&transfer)?;
    }
    multi.perform()
}

/// POST every spec's fields concurrently, form-urlencoded; `each` is
/// invoked once per completed transfer, as it completes.
pub fn post<I, F>(specs: I, each: F) -> Result<(), MultiError>
where
    I: IntoIterator<Item = PostSpec>,
    F: FnMut(&Transfer) + 'static,
{
    let hook = Rc::new(RefCell::new(each));
    let mut multi = Multi::new()?;
    for spec in specs {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(spec.fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        let transfer = Transfer::new(spec.url);
        transfer.set_method(Method::POST);
        transfer.set_header("Content-Type", "application/x-www-form-urlencoded");
        transfer.set_body(encoded);
        transfer.set_handler(BatchHandler { hook: hook.clone() });
        multi.add(&transfer)?;
    }
    multi.perform()
}
