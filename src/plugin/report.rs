//! Up-front audit of a module's exports.
//!
//! Calls still resolve lazily; the report only surfaces a broken module at
//! load time instead of at the first failing call.

use std::fmt;
use std::path::PathBuf;

use tracing::warn;

use super::loader::SymbolTable;
use super::shim::check_export;
use crate::hypervisor::Operation;
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    /// Operations the module does not export.
    pub missing: Vec<Operation>,
    /// Operations exported with the wrong shape, with the reason.
    pub mismatched: Vec<(Operation, String)>,
}

impl ExportReport {
    /// Check every contract operation against `table`.
    pub fn verify(table: &dyn SymbolTable) -> Self {
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();

        for op in Operation::ALL {
            match table.lookup(op.symbol()) {
                Err(_) => missing.push(op),
                Ok(export) => {
                    if let Err(e) = check_export(op, export, op.signature()) {
                        let reason = match e {
                            Error::SignatureMismatch {
                                expected, found, ..
                            } => format!("expected {:?}, found {:?}", expected, found),
                            other => other.to_string(),
                        };
                        mismatched.push((op, reason));
                    }
                }
            }
        }

        Self {
            path: table.path().to_path_buf(),
            missing,
            mismatched,
        }
    }

    /// True when every operation is exported with the right shape.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }

    /// Whether `op` can be called.
    pub fn supports(&self, op: Operation) -> bool {
        !self.missing.contains(&op) && !self.mismatched.iter().any(|(m, _)| *m == op)
    }

    pub(crate) fn log(&self) {
        for op in &self.missing {
            warn!("plugin {} does not export {}", self.path.display(), op);
        }
        for (op, reason) in &self.mismatched {
            warn!(
                "plugin {} exports {} with the wrong signature: {}",
                self.path.display(),
                op,
                reason
            );
        }
    }
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module: {}", self.path.display())?;
        for op in Operation::ALL {
            let status = if self.missing.contains(&op) {
                "missing".to_string()
            } else if let Some((_, reason)) = self.mismatched.iter().find(|(m, _)| *m == op) {
                format!("mismatch ({})", reason)
            } else {
                "ok".to_string()
            };
            writeln!(f, "  {:<20} {}", op.symbol(), status)?;
        }
        Ok(())
    }
}
