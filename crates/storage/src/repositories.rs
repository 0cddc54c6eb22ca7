// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository catalog

use crate::error::StoreError;
use crate::journal::Journal;
use depot_core::{Operation, Repository};
use std::sync::Arc;

#[derive(Clone)]
pub struct RepositoryStore {
    journal: Arc<Journal>,
}

impl RepositoryStore {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }

    pub fn create(&self, repository: Repository) -> Result<Repository, StoreError> {
        self.journal.update(|state| {
            if state.repositories.contains_key(&repository.id) {
                return Err(StoreError::conflict("repository", repository.id.clone()));
            }
            Ok((
                Some(Operation::RepositorySave {
                    repository: repository.clone(),
                }),
                repository,
            ))
        })
    }

    pub fn get(&self, id: &str) -> Result<Repository, StoreError> {
        self.journal
            .read(|state| state.repositories.get(id).cloned())
            .ok_or_else(|| StoreError::not_found("repository", id))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.journal.read(|state| state.repositories.contains_key(id))
    }

    /// All repositories, ordered by id
    pub fn list(&self) -> Vec<Repository> {
        self.journal
            .read(|state| state.repositories.values().cloned().collect())
    }

    /// Modify a repository in place; `edit` may veto with an error
    pub fn update(
        &self,
        id: &str,
        edit: impl FnOnce(&mut Repository) -> Result<(), StoreError>,
    ) -> Result<Repository, StoreError> {
        self.journal.update(|state| {
            let mut repository = state
                .repositories
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("repository", id))?;
            edit(&mut repository)?;
            Ok((
                Some(Operation::RepositorySave {
                    repository: repository.clone(),
                }),
                repository,
            ))
        })
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.journal.update(|state| {
            if !state.repositories.contains_key(id) {
                return Err(StoreError::not_found("repository", id));
            }
            Ok((
                Some(Operation::RepositoryDelete { id: id.to_string() }),
                (),
            ))
        })
    }
}
