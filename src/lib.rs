/*
Copyright 2020 <盏一 w@hidva.com>
Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at
http://www.apache.org/licenses/LICENSE-2.0
Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/
use stderrlog::{ColorChoice, Timestamp};

pub mod cache;

pub use cache::{Cache, CacheError, FileDataGuard, MutableFileDataGuard};

/// Every backing file is exactly this many bytes; a short file is a fault,
/// a missing one is created and zero('0')-filled to this length.
pub const FILE_SIZE: usize = 10_240;

/// Mirrors `kuiba::init_log()`: a single process-wide stderr logger, with
/// `verbosity` following the `stderrlog` convention (0 = errors only, each
/// step up enables one more level, `warn` -> `info` -> `debug` -> `trace`).
pub fn init_log(verbosity: usize) {
    stderrlog::new()
        .verbosity(verbosity)
        .timestamp(Timestamp::Microsecond)
        .color(ColorChoice::Never)
        .init()
        .unwrap();
}
