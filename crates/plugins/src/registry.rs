// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin lookup by type id

use crate::distributor::{Distributor, NoOpDistributor};
use crate::importer::{Importer, NoOpImporter};
use crate::traced::{TracedDistributor, TracedImporter};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Table of importer and distributor implementations, keyed by type id
///
/// Built once at startup; every registered plugin is wrapped in its traced
/// counterpart.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    importers: BTreeMap<String, Arc<dyn Importer>>,
    distributors: BTreeMap<String, Arc<dyn Distributor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a no-op plugin for every listed type id
    pub fn noop<I, D>(importer_types: I, distributor_types: D) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut registry = Self::new();
        for type_id in importer_types {
            registry.register_importer(type_id, NoOpImporter::new());
        }
        for type_id in distributor_types {
            registry.register_distributor(type_id, NoOpDistributor::new());
        }
        registry
    }

    pub fn register_importer(&mut self, type_id: impl Into<String>, importer: impl Importer) {
        let type_id = type_id.into();
        self.importers.insert(
            type_id.clone(),
            Arc::new(TracedImporter::new(type_id, importer)),
        );
    }

    pub fn register_distributor(
        &mut self,
        type_id: impl Into<String>,
        distributor: impl Distributor,
    ) {
        let type_id = type_id.into();
        self.distributors.insert(
            type_id.clone(),
            Arc::new(TracedDistributor::new(type_id, distributor)),
        );
    }

    pub fn importer(&self, type_id: &str) -> Option<Arc<dyn Importer>> {
        self.importers.get(type_id).cloned()
    }

    pub fn distributor(&self, type_id: &str) -> Option<Arc<dyn Distributor>> {
        self.distributors.get(type_id).cloned()
    }

    pub fn importer_types(&self) -> impl Iterator<Item = &str> {
        self.importers.keys().map(String::as_str)
    }

    pub fn distributor_types(&self) -> impl Iterator<Item = &str> {
        self.distributors.keys().map(String::as_str)
    }
}
