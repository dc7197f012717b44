// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod auth_client;
pub mod auth_server;
pub mod stream_config;
