// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Keeps a TLS endpoint supplied with a certificate for the server's public
//! IP address, obtained and renewed over ACME.

pub mod acme;
pub mod certificate;
pub mod config;
pub mod crypto;
pub mod fetcher;
pub mod http;
pub mod ip;
pub mod scheduler;
pub mod signature;
pub mod storage;
pub mod utils;
