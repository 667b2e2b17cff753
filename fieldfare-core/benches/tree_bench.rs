use fieldfare_core::{ChunkId, ChunkStore, ChunkTree, MemoryChunkStore};
use std::sync::Arc;
use std::time::Instant;

fn key(i: u32) -> ChunkId {
    ChunkId::digest(format!("key{:06}", i).as_bytes())
}

fn main() {
    println!("ChunkTree Performance Benchmark\n");
    println!("===============================\n");

    for degree in [5, 32] {
        let store = Arc::new(MemoryChunkStore::new());
        let mut tree = match ChunkTree::new(degree, store.clone()) {
            Ok(tree) => tree,
            Err(e) => {
                eprintln!("cannot create tree: {}", e);
                return;
            }
        };

        // Insert 10,000 items
        let start = Instant::now();
        for i in 0..10_000 {
            if let Err(e) = tree.set(key(i), key(i + 1)) {
                eprintln!("insert failed: {}", e);
                return;
            }
        }
        let elapsed = start.elapsed();

        println!("Degree {}: insert 10,000 items:", degree);
        println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        println!("  Rate: {:.0} inserts/sec", 10_000.0 / elapsed.as_secs_f64());
        println!("  Depth: {}", tree.depth().unwrap_or(0));
        println!("  Chunks written: {}", store.count_chunks().unwrap_or(0));
        println!();

        // Delete half of the keys
        let start = Instant::now();
        for i in (0..10_000).step_by(2) {
            if let Err(e) = tree.delete(&key(i)) {
                eprintln!("delete failed: {}", e);
                return;
            }
        }
        let elapsed = start.elapsed();

        println!("Degree {}: delete 5,000 items:", degree);
        println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        println!("  Rate: {:.0} deletes/sec", 5_000.0 / elapsed.as_secs_f64());
        println!("  Remaining: {}", tree.entries().count());
        println!();
    }

    println!("Benchmark complete!");
}
