//! SQLite schema for the library database (`core.db`).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const TRACKS_TABLE_V1: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("path", &SqlType::Text, is_primary_key = true),
        sqlite_column!("hash", &SqlType::Text, non_null = true),
        sqlite_column!("size", &SqlType::Integer, non_null = true),
        sqlite_column!("mtime", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!(
            "duration",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "bitrate",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "verified",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_hash", "hash"), ("idx_meta", "title, artist")],
};

const REMOTES_TABLE_V1: Table = Table {
    name: "remotes",
    columns: &[
        sqlite_column!("name", &SqlType::Text, is_primary_key = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!(
            "last_sync",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[],
};

pub const LIBRARY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[TRACKS_TABLE_V1, REMOTES_TABLE_V1],
    migration: None,
}];
