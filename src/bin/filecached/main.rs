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

//! Thin demonstration front end, the direct analogue of the original
//! `app.c`: construct a cache, pin a batch of paths, unpin some, evict,
//! then tear down. Parsing and process setup live here, never in
//! `filecache::cache` (spec.md §1 keeps the entry point out of the core).

use clap::{App, Arg};
use filecache::Cache;

fn main() -> anyhow::Result<()> {
    let cmdline = App::new("filecached")
        .version("0.0.1")
        .author("盏一 <w@hidva.com>")
        .about("Demonstrates the pinning file cache: pin, unpin, evict, destroy.")
        .arg(
            Arg::with_name("capacity")
                .long("capacity")
                .takes_value(true)
                .default_value("4")
                .help("maximum number of files the cache holds at once"),
        )
        .arg(
            Arg::with_name("pin")
                .long("pin")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("path to pin; backing file is created zero-filled if missing"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("increase log verbosity; repeat for more"),
        )
        .get_matches();

    filecache::init_log(cmdline.occurrences_of("verbose") as usize);

    let capacity: usize = cmdline
        .value_of("capacity")
        .unwrap()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid --capacity: {}", e))?;
    let paths: Vec<&str> = cmdline.values_of("pin").map_or_else(Vec::new, |v| v.collect());

    let cache = Cache::construct(capacity)?;
    cache.pin(&paths)?;
    for path in &paths {
        println!("pinned {}", path);
    }
    println!("occupied_count = {}", cache.occupied_count());

    let unpin_count = paths.len().saturating_sub(1);
    cache.unpin(&paths[..unpin_count]);
    let evicted = cache.evict();
    println!("evict() -> {}", evicted);

    println!("destroying cache");
    cache.destroy();
    Ok(())
}
