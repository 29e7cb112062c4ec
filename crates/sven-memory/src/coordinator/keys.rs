// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Exact coordinator key names (spec §6). Centralized here so no call site
//! hand-formats a key string.

pub struct CoordinatorKeys;

impl CoordinatorKeys {
    pub fn messages(user_id: &str) -> String {
        format!("mirix:temp_messages:{user_id}")
    }

    pub fn conversations(user_id: &str) -> String {
        format!("mirix:user_conversations:{user_id}")
    }

    pub fn absorb_lock(user_id: &str) -> String {
        format!("mirix:lock:absorb:{user_id}")
    }

    pub fn init_lock(user_id: &str) -> String {
        format!("mirix:lock:init:{user_id}")
    }

    pub fn init_done(user_id: &str) -> String {
        format!("mirix:user_init_done:{user_id}")
    }

    pub fn upload_status(upload_id: &str) -> String {
        format!("mirix:upload_status:{upload_id}")
    }
}
