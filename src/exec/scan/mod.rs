// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Multi-threaded table scan.
//!
//! Overview:
//!
//!   ThreadArbiter --thread available--> AdmissionController --start--> scanner threads
//!                                                                          |
//!              TokenDispatcher <--------------- claim token ---------------+
//!                                                                          |
//!   ThreadedScanNode::get_next <---------- BatchQueue <------ push batch --+
//!
//! All components coordinate through one `ScanRunState`: the first error wins, any party
//! may mark the scan done, and the last exiting scanner thread marks it done as well.

pub mod admission;
pub mod dispatch;
pub mod node;
pub mod queue;
pub mod state;
pub mod types;
mod worker;

pub use admission::{
    AdmissionController, OsThreadLauncher, WorkerBody, WorkerLauncher, WorkerRecord,
};
pub use dispatch::TokenDispatcher;
pub use node::{ScanFetch, ScanNodeOptions, ThreadedScanNode};
pub use queue::{BatchQueue, PushResult};
pub use state::ScanRunState;
pub use types::{ScanError, ScanToken, Scanner, ScannerFactory, TokenSource, VecTokenSource};
