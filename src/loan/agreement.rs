//! Location of the signed agreement letter for a loan

use std::path::{Path, PathBuf};

const AGREEMENT_FILE_NAME: &str = "letter-of-agreement.pdf";

/// Computes where a loan's uploaded agreement document lives
#[derive(Debug, Clone)]
pub struct AgreementLocator {
    base_dir: PathBuf,
}

impl AgreementLocator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `{cwd}/files/agreement-letter`, falling back to a relative path when
    /// the working directory cannot be read
    pub fn default_base_dir() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("files")
            .join("agreement-letter")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn document_path(&self, loan_id: u64) -> PathBuf {
        self.base_dir
            .join(loan_id.to_string())
            .join(AGREEMENT_FILE_NAME)
    }

    /// Path stored on the loan when it is disbursed
    pub fn document_url(&self, loan_id: u64) -> String {
        self.document_path(loan_id).to_string_lossy().into_owned()
    }
}

impl Default for AgreementLocator {
    fn default() -> Self {
        Self::new(Self::default_base_dir())
    }
}
