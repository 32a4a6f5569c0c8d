// Copyright 2020 <盏一 w@hidva.com>
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to resolve path")]
    Canonicalize(#[source] std::io::Error),

    #[error("short read while loading a file into the cache")]
    ShortRead,

    #[error("short write while flushing a file out of the cache")]
    ShortWrite,

    #[error("file is not cached, or not pinned")]
    NotFound,

    #[error("cache is shutting down")]
    ShuttingDown,
}
