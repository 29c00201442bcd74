use crate::errors::TunnelError;
use indexmap::IndexSet;
use std::fmt;

/// Project IDs and public keys permitted to use the tunnel.
///
/// Each dimension is checked independently; an empty set permits everything
/// for that dimension. Sets keep the order they were configured in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllowList {
    project_ids: IndexSet<String>,
    orgs: IndexSet<String>,
}

impl AllowList {
    pub fn new<P, O>(project_ids: P, orgs: O) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            project_ids: project_ids.into_iter().map(Into::into).collect(),
            orgs: orgs.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds an allow list from comma separated values.
    pub fn from_csv(project_ids: &str, orgs: &str) -> Self {
        Self::new(split_csv(project_ids), split_csv(orgs))
    }

    pub fn project_ids(&self) -> &IndexSet<String> {
        &self.project_ids
    }

    pub fn orgs(&self) -> &IndexSet<String> {
        &self.orgs
    }

    /// Checks a project ID and public key against the list.
    ///
    /// The project is checked first, so a request failing both checks is
    /// reported as a project rejection.
    pub fn validate(&self, project_id: &str, public_key: &str) -> Result<(), TunnelError> {
        if !self.project_ids.is_empty() && !self.project_ids.contains(project_id) {
            tracing::debug!(
                project_id,
                allowed = %Permitted(&self.project_ids),
                "project ID not allowed"
            );
            return Err(TunnelError::ProjectNotAllowed(project_id.to_string()));
        }

        if !self.orgs.is_empty() && !self.orgs.contains(public_key) {
            tracing::debug!(
                public_key,
                allowed = %Permitted(&self.orgs),
                "organization not allowed"
            );
            return Err(TunnelError::OrgNotAllowed(public_key.to_string()));
        }

        Ok(())
    }
}

/// Splits on `,`, trims entries and drops empty ones.
pub fn split_csv(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|v| !v.is_empty())
}

/// Displays a set as a comma separated list, or `All` when empty.
pub struct Permitted<'a>(pub &'a IndexSet<String>);

impl fmt::Display for Permitted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("All");
        }
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(value)?;
        }
        Ok(())
    }
}
