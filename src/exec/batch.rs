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
use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

/// A materialized chunk of scanned rows together with the memory backing them.
///
/// Batches move by value from the producing worker into the scan queue and then to the
/// consumer; nothing in the scan path keeps a second handle to a batch in flight.
#[derive(Debug)]
pub struct ResultBatch {
    batch: RecordBatch,
}

impl ResultBatch {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn estimated_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    /// Keep only the first `num_rows` rows. No-op when the batch is already that short.
    pub fn truncate(self, num_rows: usize) -> Self {
        if num_rows >= self.batch.num_rows() {
            return self;
        }
        Self {
            batch: self.batch.slice(0, num_rows),
        }
    }
}

impl From<RecordBatch> for ResultBatch {
    fn from(batch: RecordBatch) -> Self {
        Self::new(batch)
    }
}
