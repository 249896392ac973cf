use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use warden_core::{Category, WardenError};

use crate::audit_log;
use crate::prompt;

/// One unit of audit work.
///
/// Identity is `(reference_id, category)`. Tasks are not `Clone`: each is
/// handed to the scheduler once and consumed by exactly one pipeline run.
#[derive(Debug)]
pub struct Task {
    /// Document reference id; also the audit log key.
    pub reference_id: String,
    /// Prompt category.
    pub category: Category,
    /// Proposer template for `category`.
    pub template: &'static str,
    /// Document text, shared between the tasks of one document.
    pub input: Arc<str>,
}

impl Task {
    /// Build a task, selecting the template registered for `category`.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_audit::source::Task;
    /// use warden_core::Category;
    ///
    /// let task = Task::new("Vault", Category::Common, "contract Vault {}");
    /// assert_eq!(task.reference_id, "Vault");
    /// assert!(task.template.contains("{code}"));
    /// ```
    pub fn new(
        reference_id: impl Into<String>,
        category: Category,
        input: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            reference_id: reference_id.into(),
            category,
            template: prompt::template_for(category),
            input: input.into(),
        }
    }
}

/// An input document loaded into memory.
#[derive(Debug, Clone)]
pub struct Document {
    /// Reference id derived from the file name.
    pub reference_id: String,
    /// Full document text.
    pub text: Arc<str>,
}

/// Produces one task per (document, category), lazily.
///
/// Documents are read up front so an unreadable input fails the run before
/// any oracle call is made. Tasks are only materialized as the scheduler
/// pulls them. The source is consumed by iteration and cannot be restarted.
///
/// # Examples
///
/// ```
/// use warden_audit::source::{Document, DocumentSource};
/// use warden_core::Category;
///
/// let source = DocumentSource::from_documents(
///     vec![Document { reference_id: "A".into(), text: "contract A {}".into() }],
///     vec![Category::Common],
/// );
/// assert_eq!(source.task_count(), 1);
/// let tasks: Vec<_> = source.into_iter().collect();
/// assert_eq!(tasks[0].reference_id, "A");
/// ```
#[derive(Debug)]
pub struct DocumentSource {
    documents: Vec<Document>,
    categories: Vec<Category>,
}

impl DocumentSource {
    /// Read every document in `paths`.
    ///
    /// Reference ids are file stems. A stem that is already taken, or that
    /// maps to an audit log key already taken, gets the first free `-N`
    /// suffix.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::SourceRead`] for the first document that
    /// cannot be read.
    pub fn open(paths: &[PathBuf], categories: Vec<Category>) -> Result<Self, WardenError> {
        let mut taken: HashSet<String> = HashSet::new();
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(path).map_err(|source| WardenError::SourceRead {
                path: path.clone(),
                source,
            })?;
            let reference_id = unique_reference_id(path, &mut taken);
            documents.push(Document {
                reference_id,
                text: text.into(),
            });
        }
        Ok(Self::from_documents(documents, categories))
    }

    /// Build a source from documents already in memory.
    ///
    /// Repeated categories are dropped, keeping the first occurrence, so
    /// each (reference id, category) pair yields one task.
    pub fn from_documents(documents: Vec<Document>, mut categories: Vec<Category>) -> Self {
        let mut seen = HashSet::new();
        categories.retain(|c| seen.insert(*c));
        Self {
            documents,
            categories,
        }
    }

    /// Loaded documents.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Number of tasks iteration will yield.
    pub fn task_count(&self) -> usize {
        self.documents.len() * self.categories.len()
    }
}

impl IntoIterator for DocumentSource {
    type Item = Task;
    type IntoIter = Tasks;

    fn into_iter(self) -> Tasks {
        Tasks {
            documents: self.documents.into_iter(),
            categories: self.categories,
            current: None,
            next_category: 0,
        }
    }
}

/// Lazy task iterator returned by [`DocumentSource::into_iter`].
#[derive(Debug)]
pub struct Tasks {
    documents: std::vec::IntoIter<Document>,
    categories: Vec<Category>,
    current: Option<Document>,
    next_category: usize,
}

impl Iterator for Tasks {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        loop {
            if let Some(doc) = &self.current {
                if let Some(&category) = self.categories.get(self.next_category) {
                    self.next_category += 1;
                    return Some(Task::new(
                        doc.reference_id.clone(),
                        category,
                        Arc::clone(&doc.text),
                    ));
                }
            }
            self.current = Some(self.documents.next()?);
            self.next_category = 0;
        }
    }
}

// Uniqueness is checked on the audit log key, so `a b` and `a_b` cannot
// share a log file.
fn unique_reference_id(path: &Path, taken: &mut HashSet<String>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    let mut candidate = stem.clone();
    let mut n: usize = 1;
    while !taken.insert(audit_log::sanitize_key(&candidate)) {
        n += 1;
        candidate = format!("{stem}-{n}");
    }
    candidate
}
