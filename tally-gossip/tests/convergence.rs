use rand::{rngs::StdRng, Rng, SeedableRng};

use tally_common::{
    auth::{Authenticator, Secp256k1Authenticator},
    env::{Command, PendingEntry},
    utils::NodeId,
};
use tally_gossip::GossipDisseminator;

fn signed(auth: &Secp256k1Authenticator, key: &str, at: u64) -> PendingEntry {
    let command = Command::new(key, "v");
    let author = auth.public_key();
    let hash = PendingEntry::content_hash(&command, &author, at).unwrap();
    let signature = hex::encode(auth.sign(hash.as_bytes()).unwrap());
    PendingEntry { hash, command, signature, author, created_at: at }
}

fn verifier(auth: &Secp256k1Authenticator) -> impl Fn(&NodeId, &PendingEntry) -> bool + '_ {
    move |peer, entry| {
        let Ok(sig) = hex::decode(&entry.signature) else { return false };
        entry.author == *peer && auth.verify_with_key(entry.hash.as_bytes(), &sig, &entry.author).unwrap_or(false)
    }
}

#[test]
fn test_random_rounds_converge_to_identical_pending_sets() {
    let auths: Vec<Secp256k1Authenticator> = (0..5).map(|_| Secp256k1Authenticator::generate()).collect();
    let ids: Vec<NodeId> = auths.iter().map(|a| a.public_key()).collect();

    let mut nodes: Vec<GossipDisseminator> = ids
        .iter()
        .map(|id| {
            let mut g = GossipDisseminator::new(id.clone(), 0, 10_000);
            for other in &ids {
                g.add_peer(other.clone(), 0);
            }
            g
        })
        .collect();

    for (i, auth) in auths.iter().enumerate() {
        for n in 0..3u64 {
            assert!(nodes[i].push(signed(auth, &format!("k{i}-{n}"), n)));
        }
    }

    let mut rng = StdRng::seed_from_u64(42);
    for now in 1..200u64 {
        let a = rng.gen_range(0..nodes.len());
        nodes[a].tick(now);
        let Some(target) = nodes[a].random_peer(&mut rng) else { continue };
        let b = ids.iter().position(|id| *id == target).unwrap();

        let request = nodes[a].request();
        let first = nodes[b].handle_request(&request);
        let second = nodes[a].handle_first_response(&first.requests, first.deltas, now, verifier(&auths[a]));
        nodes[b].apply(second, now, verifier(&auths[b]));
    }

    let expected: Vec<String> = nodes[0].pending().into_iter().map(|e| e.hash).collect();
    assert_eq!(expected.len(), 15);
    for node in &nodes[1..] {
        let hashes: Vec<String> = node.pending().into_iter().map(|e| e.hash).collect();
        assert_eq!(hashes, expected);
    }
}

#[test]
fn test_forged_author_is_dropped() {
    let honest = Secp256k1Authenticator::generate();
    let forger = Secp256k1Authenticator::generate();

    let mut source = GossipDisseminator::new(forger.public_key(), 0, 10_000);
    let mut forged = signed(&forger, "k", 1);
    forged.author = honest.public_key();
    source.push(forged);

    let mut sink = GossipDisseminator::new(honest.public_key(), 0, 10_000);
    sink.add_peer(forger.public_key(), 0);
    let deltas = source.handle_request(&sink.request()).deltas;
    assert_eq!(sink.apply(deltas, 1, verifier(&honest)), 0);
    assert!(sink.pending().is_empty());
}

#[test]
fn test_departed_member_stops_contributing() {
    let auths: Vec<Secp256k1Authenticator> = (0..3).map(|_| Secp256k1Authenticator::generate()).collect();
    let ids: Vec<NodeId> = auths.iter().map(|a| a.public_key()).collect();

    let mut stayer = GossipDisseminator::new(ids[0].clone(), 0, 10_000);
    let mut leaver = GossipDisseminator::new(ids[1].clone(), 0, 10_000);
    for id in &ids[1..] {
        stayer.add_peer(id.clone(), 0);
    }
    for id in [&ids[0], &ids[2]] {
        leaver.add_peer(id.clone(), 0);
    }
    assert!(stayer.remove_peer(&ids[1]));

    leaver.push(signed(&auths[1], "late", 1));
    let first = leaver.handle_request(&stayer.request());
    assert!(first.requests.is_empty());
    assert_eq!(stayer.apply(first.deltas, 5, verifier(&auths[0])), 0);

    assert!(!stayer.peers().contains_key(&ids[1]));
    assert!(stayer.pending().is_empty());
}
