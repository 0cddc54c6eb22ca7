// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task tags and reservation keys
//!
//! Tags classify tasks for filtering (`pulp:repository:zoo`,
//! `pulp:action:sync`). They carry no meaning for correctness.

const PREFIX: &str = "pulp";

/// Resource type segment for repositories
pub const REPOSITORY: &str = "repository";
/// Resource type segment for a repository's importer
pub const REPOSITORY_IMPORTER: &str = "repository_importer";
/// Resource type segment for a repository's distributor
pub const REPOSITORY_DISTRIBUTOR: &str = "repository_distributor";
/// Resource type segment for schedules
pub const SCHEDULE: &str = "schedule";

pub const ACTION_DELETE: &str = "delete";
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_ADD_IMPORTER: &str = "add_importer";
pub const ACTION_DELETE_IMPORTER: &str = "delete_importer";
pub const ACTION_UPDATE_IMPORTER: &str = "update_importer";
pub const ACTION_ADD_DISTRIBUTOR: &str = "add_distributor";
pub const ACTION_REMOVE_DISTRIBUTOR: &str = "remove_distributor";
pub const ACTION_UPDATE_DISTRIBUTOR: &str = "update_distributor";
pub const ACTION_SYNC: &str = "sync";
pub const ACTION_PUBLISH: &str = "publish";
pub const ACTION_IMPORT_UPLOAD: &str = "import_upload";
pub const ACTION_RESOLVE_DEPENDENCIES: &str = "resolve_dependencies";
pub const ACTION_APPLICABILITY: &str = "content_applicability_regeneration";
pub const ACTION_ASSOCIATE: &str = "associate";

/// `pulp:<resource_type>:<id>`
pub fn resource_tag(resource_type: &str, id: &str) -> String {
    format!("{}:{}:{}", PREFIX, resource_type, id)
}

/// `pulp:action:<action>`
pub fn action_tag(action: &str) -> String {
    format!("{}:action:{}", PREFIX, action)
}

pub fn repository_tag(repo_id: &str) -> String {
    resource_tag(REPOSITORY, repo_id)
}

pub fn importer_tag(importer_id: &str) -> String {
    resource_tag(REPOSITORY_IMPORTER, importer_id)
}

pub fn distributor_tag(distributor_id: &str) -> String {
    resource_tag(REPOSITORY_DISTRIBUTOR, distributor_id)
}

pub fn schedule_tag(schedule_id: &str) -> String {
    resource_tag(SCHEDULE, schedule_id)
}

/// Reservation key serializing every mutation of one repository
pub fn repository_resource(repo_id: &str) -> String {
    format!("{}:{}", REPOSITORY, repo_id)
}
