//! Convergence and trace-soundness tests.
//!
//! Replicas that keep exchanging gossip after the last write must end
//! up with identical visible maps, and whatever ordering of partitions,
//! writes, and gossip the cluster goes through, the recorded trace must
//! pass the offline causal validator.

use causalkv::simulator::{Cluster, DeterministicRng};

const NODES: [&str; 3] = ["n1", "n2", "n3"];
const CLIENTS: [&str; 3] = ["c1", "c2", "c3"];
const KEYS: [&str; 3] = ["x", "y", "z"];

async fn cluster_with_seeded_writes() -> Cluster {
    let mut cluster = Cluster::new();
    for node in NODES {
        cluster.register_node(node).await.unwrap();
    }
    // One write lands on every node so each replica mints an event of
    // its own before partitions start.
    for (i, node) in NODES.iter().enumerate() {
        cluster
            .write("c1", node, "seed", &i.to_string())
            .await
            .ok();
        cluster.gossip_sweep().await;
    }
    cluster
}

fn assert_converged(cluster: &Cluster, context: &str) {
    let maps = cluster.visible_maps();
    for map in &maps[1..] {
        assert_eq!(map, &maps[0], "maps diverged ({})", context);
    }
}

#[tokio::test]
async fn test_convergence_after_partition() {
    let mut cluster = cluster_with_seeded_writes().await;
    cluster.partition("n1", "n2");
    cluster.partition("n1", "n3");
    cluster.partition("n2", "n3");

    cluster.write("c1", "n1", "x", "1").await.unwrap();
    cluster.write("c2", "n2", "x", "2").await.unwrap();
    cluster.write("c3", "n3", "y", "3").await.unwrap();

    cluster.heal("n1", "n2");
    cluster.heal("n1", "n3");
    cluster.heal("n2", "n3");
    for _ in 0..5 {
        cluster.gossip_sweep().await;
    }

    assert_converged(&cluster, "after heal");
    // The last write of the partition round carries the latest wall
    // clock and wins the concurrent race on x.
    let maps = cluster.visible_maps();
    assert_eq!(maps[0].get("x"), Some(&"2".to_string()));
    assert_eq!(maps[0].get("y"), Some(&"3".to_string()));
    cluster.validate().unwrap();
}

#[tokio::test]
async fn test_frontier_dominates_log_after_exchanges() {
    let mut cluster = cluster_with_seeded_writes().await;
    cluster.write("c1", "n1", "x", "1").await.unwrap();
    cluster.write("c2", "n2", "y", "2").await.unwrap();
    cluster.gossip_sweep().await;

    // Every replica's frontier must dominate the context of every
    // column it stores.
    for node in NODES {
        let replica = cluster.node(node).replica();
        let maxcc = replica.maxcc_snapshot();
        for column in replica.events_snapshot() {
            assert!(
                column.clock.context.at_most(&maxcc),
                "{}: column {} escapes the frontier",
                node,
                column.clock.id
            );
        }
    }
    cluster.validate().unwrap();
}

#[tokio::test]
async fn test_log_prefixes_are_stable_and_frontier_monotone() {
    let mut cluster = cluster_with_seeded_writes().await;
    let mut rng = DeterministicRng::new(11);

    let mut previous_frontiers: Vec<_> = NODES
        .iter()
        .map(|n| cluster.node(n).replica().maxcc_snapshot())
        .collect();
    let mut previous_logs: Vec<_> = NODES
        .iter()
        .map(|n| cluster.node(n).replica().events_snapshot())
        .collect();

    for step in 0..30 {
        let client = *rng.choose(&CLIENTS).unwrap();
        let node = *rng.choose(&NODES).unwrap();
        let key = *rng.choose(&KEYS).unwrap();
        if rng.gen_bool(0.5) {
            cluster.write(client, node, key, &step.to_string()).await.ok();
        } else {
            cluster.read(client, node, key).await.ok();
        }
        cluster.gossip_random(&mut rng).await;

        for (i, name) in NODES.iter().enumerate() {
            let replica = cluster.node(name).replica();
            // The frontier never loses ground.
            let frontier = replica.maxcc_snapshot();
            assert!(
                previous_frontiers[i].at_most(&frontier),
                "{}: frontier regressed at step {}",
                name,
                step
            );
            previous_frontiers[i] = frontier;

            // Appended events keep their index and their id.
            let log = replica.events_snapshot();
            assert!(log.len() >= previous_logs[i].len());
            for (old, new) in previous_logs[i].iter().zip(&log) {
                assert_eq!(old.clock.id, new.clock.id, "{}: log reordered", name);
            }
            previous_logs[i] = log;
        }
    }
    cluster.validate().unwrap();
}

#[tokio::test]
async fn test_random_histories_pass_the_validator() {
    for seed in 0..8 {
        let mut cluster = cluster_with_seeded_writes().await;
        let mut rng = DeterministicRng::new(seed);
        let mut partitioned: Vec<(usize, usize)> = Vec::new();

        for step in 0..50 {
            match rng.gen_range(0, 10) {
                0..=3 => {
                    let client = *rng.choose(&CLIENTS).unwrap();
                    let node = *rng.choose(&NODES).unwrap();
                    let key = *rng.choose(&KEYS).unwrap();
                    cluster
                        .write(client, node, key, &format!("s{}", step))
                        .await
                        .ok();
                }
                4..=6 => {
                    let client = *rng.choose(&CLIENTS).unwrap();
                    let node = *rng.choose(&NODES).unwrap();
                    let key = *rng.choose(&KEYS).unwrap();
                    cluster.read(client, node, key).await.ok();
                }
                7 => {
                    let a = rng.gen_range(0, NODES.len() as u64) as usize;
                    let b = rng.gen_range(0, NODES.len() as u64) as usize;
                    if a != b && !partitioned.contains(&(a, b)) {
                        cluster.partition(NODES[a], NODES[b]);
                        partitioned.push((a, b));
                    }
                }
                8 => {
                    if let Some(&(a, b)) = partitioned.first() {
                        cluster.heal(NODES[a], NODES[b]);
                        partitioned.remove(0);
                    }
                }
                _ => cluster.gossip_random(&mut rng).await,
            }
        }

        // Heal everything and let gossip finish the job.
        for (a, b) in partitioned.drain(..) {
            cluster.heal(NODES[a], NODES[b]);
        }
        for _ in 0..5 {
            cluster.gossip_sweep().await;
        }

        assert_converged(&cluster, &format!("seed {}", seed));
        if let Err(err) = cluster.validate() {
            panic!("seed {}: {}\ntrace: {:#?}", seed, err, cluster.trace());
        }
    }
}
