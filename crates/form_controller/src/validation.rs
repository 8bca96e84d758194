use shared::domain::FieldValue;

use crate::host::FormHost;

/// Gate run synchronously before any notification or request.
/// `false` aborts the submission silently.
pub trait Validator: Send + Sync {
    fn validate(&self, form: &dyn FormHost) -> bool;
}

/// Accepts every submission.
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _form: &dyn FormHost) -> bool {
        true
    }
}

/// Rejects a submission when any listed field is absent or blank.
pub struct RequiredFields {
    names: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredFields {
    fn validate(&self, form: &dyn FormHost) -> bool {
        let fields = form.field_set();
        self.names.iter().all(|name| {
            fields
                .get_all(name)
                .into_iter()
                .any(|value: &FieldValue| !value.is_blank())
        })
    }
}

impl<F> Validator for F
where
    F: Fn(&dyn FormHost) -> bool + Send + Sync,
{
    fn validate(&self, form: &dyn FormHost) -> bool {
        self(form)
    }
}
