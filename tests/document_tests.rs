use concord::{
    ActorId, ConcordError, Document, ObjId, ObjType, PatchAction, Prop, ScalarValue, Value, ROOT,
};
use pretty_assertions::assert_eq;

fn assert_same_tree(a: &Document, b: &Document, obj: &ObjId) {
    assert_eq!(a.object_type(obj), b.object_type(obj));
    match a.object_type(obj).expect("object missing") {
        ObjType::Map | ObjType::Table => {
            assert_eq!(a.keys(obj), b.keys(obj));
            for key in a.keys(obj) {
                let (va, ia) = a.get(obj, key.as_str()).unwrap().unwrap();
                let (vb, ib) = b.get(obj, key.as_str()).unwrap().unwrap();
                assert_eq!(va, vb, "value mismatch at key {}", key);
                assert_eq!(ia, ib);
                assert_eq!(a.get_all(obj, &key).unwrap(), b.get_all(obj, &key).unwrap());
                if va.is_object() {
                    assert_same_tree(a, b, &ObjId::Id(ia));
                }
            }
        }
        ObjType::List | ObjType::Text => {
            assert_eq!(a.length(obj), b.length(obj));
            let values_a = a.values(obj);
            assert_eq!(values_a, b.values(obj));
            for (value, id) in values_a {
                if value.is_object() {
                    assert_same_tree(a, b, &ObjId::Id(id));
                }
            }
        }
    }
}

fn assert_docs_equal(a: &Document, b: &Document) {
    assert_eq!(a.get_heads(), b.get_heads());
    assert_eq!(a.get_changes().len(), b.get_changes().len());
    assert_same_tree(a, b, &ROOT);
}

// S1: put, save, load, read back.
#[test]
fn basic_round_trip() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "x", 42_i64)).unwrap();
    let bytes = doc.save();
    let loaded = Document::load(&bytes).unwrap();

    let (value, _) = loaded.get(&ROOT, "x").unwrap().unwrap();
    assert_eq!(value, Value::int(42));
    assert_eq!(loaded.get_heads().len(), 1);
    assert_eq!(loaded.get_heads(), doc.get_heads());
    assert_eq!(loaded.get_actor(), doc.get_actor());
}

#[test]
fn round_trip_preserves_every_value_kind() {
    let mut doc = Document::new();
    doc.transact(|tx| {
        tx.put(&ROOT, "null", ())?;
        tx.put(&ROOT, "bool", true)?;
        tx.put(&ROOT, "int", -7_i64)?;
        tx.put(&ROOT, "uint", 7_u64)?;
        tx.put(&ROOT, "f64", 1.5_f64)?;
        tx.put(&ROOT, "str", "hello")?;
        tx.put(&ROOT, "bytes", vec![1_u8, 2, 3])?;
        tx.put(&ROOT, "counter", ScalarValue::counter(5))?;
        tx.put(&ROOT, "ts", ScalarValue::Timestamp(1_700_000_000_000))?;
        let map = tx.put_object(&ROOT, "map", ObjType::Map)?;
        tx.put(&map, "nested", 1_i64)?;
        let list = tx.put_object(&ROOT, "list", ObjType::List)?;
        tx.insert(&list, 0, "a")?;
        tx.insert(&list, 1, "b")?;
        let text = tx.put_object(&ROOT, "text", ObjType::Text)?;
        tx.splice_text(&text, 0, 0, "hi")?;
        Ok(())
    })
    .unwrap();

    let loaded = Document::load(&doc.save()).unwrap();
    assert_docs_equal(&doc, &loaded);
    let (_, list_id) = loaded.get(&ROOT, "list").unwrap().unwrap();
    assert_eq!(loaded.length(&ObjId::Id(list_id)), 2);
    let (_, text_id) = loaded.get(&ROOT, "text").unwrap().unwrap();
    assert_eq!(loaded.text(&ObjId::Id(text_id)).unwrap(), "hi");
}

// S2: concurrent map writes keep both values, greatest op id wins.
#[test]
fn concurrent_map_writes() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "x", 10_i64)).unwrap();

    let mut other = doc.fork();
    doc.transact(|tx| tx.put(&ROOT, "x", 11_i64)).unwrap();
    other.transact(|tx| tx.put(&ROOT, "x", 12_i64)).unwrap();
    doc.merge(&other).unwrap();

    let all = doc.get_all(&ROOT, "x").unwrap();
    let mut values: Vec<i64> = all.iter().map(|(v, _)| v.to_i64().unwrap()).collect();
    values.sort();
    assert_eq!(values, vec![11, 12]);

    // the winner carries the greater op id under (counter, actor) order
    let (value, id) = doc.get(&ROOT, "x").unwrap().unwrap();
    let max_id = all.iter().map(|(_, id)| *id).max().unwrap();
    assert_eq!(id, max_id);
    let expected = if doc.get_actor() > other.get_actor() {
        11
    } else {
        12
    };
    assert_eq!(value.to_i64().unwrap(), expected);
}

// S3: concurrent inserts at one anchor order by op id descending.
#[test]
fn rga_concurrent_inserts() {
    let mut doc = Document::new();
    let list = doc
        .transact(|tx| {
            let list = tx.put_object(&ROOT, "L", ObjType::List)?;
            tx.insert(&list, 0, "A")?;
            Ok(list)
        })
        .unwrap();

    let mut other = doc.fork();
    doc.transact(|tx| tx.insert(&list, 1, "B")).unwrap();
    other.transact(|tx| tx.insert(&list, 1, "C")).unwrap();
    doc.merge(&other).unwrap();

    let values: Vec<String> = doc
        .values(&list)
        .into_iter()
        .map(|(v, _)| v.to_str().unwrap().to_string())
        .collect();
    // both inserts share the anchor "A" and the same counter; the greater
    // actor's element comes first
    let expected = if doc.get_actor() > other.get_actor() {
        vec!["A", "B", "C"]
    } else {
        vec!["A", "C", "B"]
    };
    assert_eq!(values, expected);

    // the other peer converges to the identical order
    other.merge(&doc).unwrap();
    assert_docs_equal(&doc, &other);
}

// S4: text splice with a time-travel read.
#[test]
fn text_splice_with_time_travel() {
    let mut doc = Document::new();
    let text = doc
        .transact(|tx| {
            let text = tx.put_object(&ROOT, "T", ObjType::Text)?;
            tx.splice_text(&text, 0, 0, "Hello World")?;
            Ok(text)
        })
        .unwrap();

    let heads = doc.get_heads();
    doc.transact(|tx| tx.splice_text(&text, 5, 6, " C++")).unwrap();

    assert_eq!(doc.text(&text).unwrap(), "Hello C++");
    assert_eq!(doc.text_at(&text, &heads).unwrap(), "Hello World");
    assert_eq!(doc.length_at(&text, &heads).unwrap(), 11);
}

// S5: counters converge additively.
#[test]
fn counter_convergence() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "c", ScalarValue::counter(0)))
        .unwrap();

    let mut other = doc.fork();
    doc.transact(|tx| tx.increment(&ROOT, "c", 5)).unwrap();
    other.transact(|tx| tx.increment(&ROOT, "c", 3)).unwrap();
    doc.merge(&other).unwrap();

    let (value, _) = doc.get(&ROOT, "c").unwrap().unwrap();
    match value {
        Value::Scalar(ScalarValue::Counter(c)) => assert_eq!(c.value(), 8),
        other => panic!("expected a counter, got {:?}", other),
    }

    other.merge(&doc).unwrap();
    assert_docs_equal(&doc, &other);
}

#[test]
fn merge_is_commutative_associative_idempotent() {
    let mut a = Document::new();
    a.transact(|tx| tx.put(&ROOT, "a", 1_i64)).unwrap();

    let mut b = a.fork();
    b.transact(|tx| {
        tx.put(&ROOT, "b", 2_i64)?;
        let list = tx.put_object(&ROOT, "list", ObjType::List)?;
        tx.insert(&list, 0, "x")?;
        Ok(())
    })
    .unwrap();

    let mut c = b.fork();
    c.transact(|tx| tx.put(&ROOT, "a", 3_i64)).unwrap();
    a.transact(|tx| tx.put(&ROOT, "d", 4_i64)).unwrap();

    // (a + b) + c == a + (b + c)
    let mut left = a.clone();
    left.merge(&b).unwrap();
    left.merge(&c).unwrap();
    let mut bc = b.clone();
    bc.merge(&c).unwrap();
    let mut right = a.clone();
    right.merge(&bc).unwrap();
    assert_docs_equal(&left, &right);

    // a + b == b + a
    let mut ab = a.clone();
    ab.merge(&b).unwrap();
    let mut ba = b.clone();
    ba.merge(&a).unwrap();
    assert_docs_equal(&ab, &ba);

    // a + a == a
    let mut aa = a.clone();
    aa.merge(&a.clone()).unwrap();
    assert_docs_equal(&aa, &a);

    // a + empty == a
    let mut ae = a.clone();
    ae.merge(&Document::new()).unwrap();
    assert_docs_equal(&ae, &a);
}

#[test]
fn change_hashes_are_deterministic_and_order_sensitive() {
    let actor = ActorId::from([7; 16]);

    let make = |first: &str, second: &str| {
        let mut doc = Document::with_actor(actor);
        doc.transact(|tx| {
            tx.put(&ROOT, first, 1_i64)?;
            tx.put(&ROOT, second, 2_i64)
        })
        .unwrap();
        doc.get_heads()[0]
    };

    // identical histories hash identically
    assert_eq!(make("x", "y"), make("x", "y"));
    // reordering the operations changes the content address
    assert_ne!(make("x", "y"), make("y", "x"));
}

#[test]
fn change_hash_covers_dependencies() {
    let actor = ActorId::from([7; 16]);
    let mut doc = Document::with_actor(actor);
    doc.transact(|tx| tx.put(&ROOT, "x", 1_i64)).unwrap();
    doc.transact(|tx| tx.put(&ROOT, "x", 2_i64)).unwrap();

    let changes = doc.get_changes();
    assert_eq!(changes[1].deps(), &[changes[0].hash()]);
    assert_ne!(changes[0].hash(), changes[1].hash());
}

#[test]
fn cursors_stay_anchored() {
    let mut doc = Document::new();
    let list = doc
        .transact(|tx| {
            let list = tx.put_object(&ROOT, "list", ObjType::List)?;
            tx.insert(&list, 0, "a")?;
            tx.insert(&list, 1, "b")?;
            tx.insert(&list, 2, "c")?;
            Ok(list)
        })
        .unwrap();

    let cursor = doc.cursor(&list, 1).unwrap().unwrap();
    assert_eq!(doc.resolve_cursor(&list, &cursor).unwrap(), Some(1));

    // insertions before the cursor shift the index, not the cursor
    doc.transact(|tx| tx.insert(&list, 0, "z")).unwrap();
    assert_eq!(doc.resolve_cursor(&list, &cursor).unwrap(), Some(2));

    // insertions after the cursor leave it alone
    doc.transact(|tx| tx.insert(&list, 4, "w")).unwrap();
    assert_eq!(doc.resolve_cursor(&list, &cursor).unwrap(), Some(2));

    // deleting the element makes the cursor unresolvable
    let before_delete = doc.get_heads();
    doc.transact(|tx| tx.delete(&list, 2_usize)).unwrap();
    assert_eq!(doc.resolve_cursor(&list, &cursor).unwrap(), None);

    // but it still resolves against the history before the delete
    assert_eq!(
        doc.resolve_cursor_at(&list, &cursor, &before_delete).unwrap(),
        Some(2)
    );
    let old_cursor = doc.cursor_at(&list, 2, &before_delete).unwrap().unwrap();
    assert_eq!(old_cursor, cursor);

    // out of bounds cursors do not exist
    assert_eq!(doc.cursor(&list, 99).unwrap(), None);
}

#[test]
fn single_bit_flip_rejects_the_document() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "x", 42_i64)).unwrap();
    let bytes = doc.save();

    // flip one bit inside the body (past the 9 byte envelope prefix)
    let mut corrupt = bytes.clone();
    let target = corrupt.len() - 1;
    corrupt[target] ^= 0x01;
    assert!(Document::load(&corrupt).is_err());

    // truncation is also rejected
    assert!(Document::load(&bytes[..bytes.len() - 1]).is_err());
    // as is garbage
    assert!(Document::load(b"not a document").is_err());
    // the untouched bytes still load
    assert!(Document::load(&bytes).is_ok());
}

#[test]
fn failed_transactions_roll_back() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "keep", 1_i64)).unwrap();
    let heads = doc.get_heads();

    let result: Result<(), ConcordError> = doc.transact(|tx| {
        tx.put(&ROOT, "discard", 2_i64)?;
        tx.increment(&ROOT, "keep", 1)?; // not a counter: fails
        Ok(())
    });
    assert!(matches!(result, Err(ConcordError::InvalidOperation(_))));

    // nothing of the failed transaction remains
    assert_eq!(doc.get_heads(), heads);
    assert!(doc.get(&ROOT, "discard").unwrap().is_none());
    assert_eq!(doc.keys(&ROOT), vec!["keep"]);

    // and the document still works afterwards
    doc.transact(|tx| tx.put(&ROOT, "after", 3_i64)).unwrap();
    assert_eq!(doc.keys(&ROOT), vec!["after", "keep"]);
}

#[test]
fn dropped_transactions_roll_back() {
    let mut doc = Document::new();
    {
        let mut tx = doc.transaction();
        tx.put(&ROOT, "x", 1_i64).unwrap();
        // dropped without commit
    }
    assert!(doc.get(&ROOT, "x").unwrap().is_none());
    assert!(doc.get_heads().is_empty());
}

#[test]
fn empty_transactions_commit_nothing() {
    let mut doc = Document::new();
    let tx = doc.transaction();
    assert_eq!(tx.commit(), None);
    assert!(doc.get_heads().is_empty());
}

#[test]
fn invalid_operations_are_rejected() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "n", 1_i64)).unwrap();

    // increment of a non counter
    assert!(doc
        .transact(|tx| tx.increment(&ROOT, "n", 1))
        .is_err());
    // delete of a missing key
    assert!(doc
        .transact(|tx| tx.delete(&ROOT, "missing"))
        .is_err());
    // empty keys are not allowed
    assert!(doc.transact(|tx| tx.put(&ROOT, "", 1_i64)).is_err());
    // unknown objects are rejected
    let bogus = ObjId::Id(concord::OpId::new(999, *doc.get_actor()));
    assert!(matches!(
        doc.transact(|tx| tx.put(&bogus, "k", 1_i64)),
        Err(ConcordError::InvalidObjId(_))
    ));
    // sequence ops on maps are rejected
    assert!(doc.transact(|tx| tx.insert(&ROOT, 0, 1_i64)).is_err());
}

#[test]
fn patches_describe_the_transaction() {
    let mut doc = Document::new();
    let list = doc
        .transact(|tx| {
            let list = tx.put_object(&ROOT, "list", ObjType::List)?;
            for (i, v) in ["a", "b", "c", "d"].iter().enumerate() {
                tx.insert(&list, i, *v)?;
            }
            tx.put(&ROOT, "counter", ScalarValue::counter(0))?;
            Ok(list)
        })
        .unwrap();

    let ((), patches) = doc
        .transact_with_patches(|tx| {
            tx.put(&ROOT, "x", 1_i64)?;
            tx.delete(&list, 1_usize)?;
            tx.delete(&list, 1_usize)?;
            tx.increment(&ROOT, "counter", 2)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(patches.len(), 3);
    assert!(matches!(
        &patches[0].action,
        PatchAction::Put { value, .. } if *value == Value::int(1)
    ));
    // the two deletes at index 1 coalesced
    assert_eq!(patches[1].prop, Prop::Seq(1));
    assert!(matches!(
        patches[1].action,
        PatchAction::Delete { index: 1, count: 2 }
    ));
    assert!(matches!(
        patches[2].action,
        PatchAction::Increment { delta: 2 }
    ));

    let text = doc
        .transact(|tx| {
            let text = tx.put_object(&ROOT, "text", ObjType::Text)?;
            tx.splice_text(&text, 0, 0, "hello")?;
            Ok(text)
        })
        .unwrap();
    let ((), patches) = doc
        .transact_with_patches(|tx| tx.splice_text(&text, 0, 2, "HE"))
        .unwrap();
    assert_eq!(patches.len(), 1);
    assert!(matches!(
        &patches[0].action,
        PatchAction::SpliceText { index: 0, delete_count: 2, text } if text == "HE"
    ));
    assert_eq!(doc.text(&text).unwrap(), "HEllo");
}

#[test]
fn marks_project_to_visible_indices() {
    let mut doc = Document::new();
    let text = doc
        .transact(|tx| {
            let text = tx.put_object(&ROOT, "T", ObjType::Text)?;
            tx.splice_text(&text, 0, 0, "hello world")?;
            tx.mark(&text, 0, 5, "bold", true)?;
            Ok(text)
        })
        .unwrap();

    let marks = doc.marks(&text).unwrap();
    assert_eq!(marks.len(), 1);
    assert_eq!((marks[0].start, marks[0].end), (0, 5));
    assert_eq!(marks[0].name, "bold");
    assert_eq!(marks[0].value, ScalarValue::Boolean(true));

    // an insertion before the range shifts the projection
    doc.transact(|tx| tx.splice_text(&text, 0, 0, ">> "))
        .unwrap();
    let marks = doc.marks(&text).unwrap();
    assert_eq!((marks[0].start, marks[0].end), (3, 8));

    // marks survive save and load
    let loaded = Document::load(&doc.save()).unwrap();
    assert_eq!(loaded.marks(&text).unwrap(), marks);

    // and history projects them at their old positions
    let heads = doc.get_heads();
    assert_eq!(doc.marks_at(&text, &heads).unwrap(), marks);
}

#[test]
fn time_travel_sees_old_map_state() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "x", 1_i64)).unwrap();
    let heads_one = doc.get_heads();
    doc.transact(|tx| {
        tx.put(&ROOT, "x", 2_i64)?;
        tx.put(&ROOT, "y", 3_i64)
    })
    .unwrap();

    let (value, _) = doc.get_at(&ROOT, "x", &heads_one).unwrap().unwrap();
    assert_eq!(value, Value::int(1));
    assert_eq!(doc.keys_at(&ROOT, &heads_one).unwrap(), vec!["x"]);
    assert_eq!(doc.keys(&ROOT), vec!["x", "y"]);
    assert_eq!(doc.values_at(&ROOT, &heads_one).unwrap().len(), 1);

    // unknown heads are rejected
    assert!(doc.get_at(&ROOT, "x", &[concord::ChangeHash([9; 32])]).is_err());
}

#[test]
fn forks_get_fresh_actors_and_shared_history() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "x", 1_i64)).unwrap();
    let fork = doc.fork();
    assert_ne!(doc.get_actor(), fork.get_actor());
    assert_eq!(doc.get_heads(), fork.get_heads());
    assert_same_tree(&doc, &fork, &ROOT);
}

#[test]
fn changes_apply_in_any_delivery_order() {
    let mut doc = Document::new();
    doc.transact(|tx| tx.put(&ROOT, "a", 1_i64)).unwrap();
    doc.transact(|tx| tx.put(&ROOT, "b", 2_i64)).unwrap();
    doc.transact(|tx| tx.put(&ROOT, "c", 3_i64)).unwrap();

    let mut changes: Vec<_> = doc.get_changes().into_iter().cloned().collect();
    // deliver children before parents: the receiver buffers and retries
    changes.reverse();

    let mut other = Document::new();
    other.apply_changes(changes).unwrap();
    assert_eq!(other.get_heads(), doc.get_heads());
    assert_same_tree(&doc, &other, &ROOT);
}

#[test]
fn change_chunks_round_trip_standalone() {
    let mut doc = Document::new();
    doc.transact(|tx| {
        tx.put(&ROOT, "x", 1_i64)?;
        tx.put(&ROOT, "note", "hi")
    })
    .unwrap();
    let change = doc.get_changes()[0].clone();
    let bytes = change.raw_bytes();
    let parsed = concord::Change::try_from(&bytes[..]).unwrap();
    assert_eq!(parsed.hash(), change.hash());
    assert_eq!(parsed.actor_id(), change.actor_id());
    assert_eq!(parsed.len(), change.len());

    // a flipped bit in the chunk is caught by the checksum
    let mut corrupt = bytes.clone();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x01;
    assert!(concord::Change::try_from(&corrupt[..]).is_err());
}

#[test]
fn commit_options_carry_message_and_timestamp() {
    let mut doc = Document::new();
    let mut tx = doc.transaction();
    tx.put(&ROOT, "x", 1_i64).unwrap();
    let hash = tx
        .commit_with(concord::CommitOptions {
            message: Some("initial edit".to_string()),
            timestamp: Some(1_700_000_000_000),
        })
        .unwrap();

    let change = doc.get_change_by_hash(&hash).unwrap();
    assert_eq!(change.message(), Some(&"initial edit".to_string()));
    assert_eq!(change.timestamp(), 1_700_000_000_000);

    let loaded = Document::load(&doc.save()).unwrap();
    let change = loaded.get_change_by_hash(&hash).unwrap();
    assert_eq!(change.message(), Some(&"initial edit".to_string()));
    assert_eq!(change.timestamp(), 1_700_000_000_000);
}

// Three peers edit a shared list and text concurrently through several
// rounds; every pairwise merge order must land on the identical state.
#[test]
fn interleaved_edits_converge_everywhere() {
    let mut base = Document::new();
    let (list, text) = base
        .transact(|tx| {
            let list = tx.put_object(&ROOT, "list", ObjType::List)?;
            tx.insert(&list, 0, "seed")?;
            let text = tx.put_object(&ROOT, "text", ObjType::Text)?;
            tx.splice_text(&text, 0, 0, "base")?;
            Ok((list, text))
        })
        .unwrap();

    let mut peers = vec![base.clone(), base.fork(), base.fork()];
    // a cheap deterministic sequence driving the edit mix
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for round in 0..4 {
        for (p, doc) in peers.iter_mut().enumerate() {
            let r = next();
            let len = doc.length(&list);
            doc.transact(|tx| match r % 4 {
                0 => tx.insert(&list, (r as usize / 7) % (len + 1), p as i64),
                1 if len > 1 => tx.delete(&list, (r as usize / 7) % len),
                2 => tx.splice_text(&text, 0, 0, "x"),
                _ => tx.put(&ROOT, format!("k{}", round).as_str(), p as i64),
            })
            .unwrap();
        }
        // merge every pair, both directions
        for i in 0..peers.len() {
            for j in 0..peers.len() {
                if i != j {
                    let other = peers[j].clone();
                    peers[i].merge(&other).unwrap();
                }
            }
        }
        for pair in peers.windows(2) {
            assert_docs_equal(&pair[0], &pair[1]);
        }
    }

    // every peer also survives a save/load round trip
    for doc in &peers {
        let loaded = Document::load(&doc.save()).unwrap();
        assert_docs_equal(doc, &loaded);
    }
}

#[test]
fn list_overwrites_resolve_deterministically() {
    let mut doc = Document::new();
    let list = doc
        .transact(|tx| {
            let list = tx.put_object(&ROOT, "list", ObjType::List)?;
            tx.insert(&list, 0, "original")?;
            Ok(list)
        })
        .unwrap();

    let mut other = doc.fork();
    doc.transact(|tx| tx.put(&list, 0_usize, "left")).unwrap();
    other.transact(|tx| tx.put(&list, 0_usize, "right")).unwrap();

    doc.merge(&other).unwrap();
    other.merge(&doc).unwrap();
    assert_eq!(doc.values(&list), other.values(&list));
    let winner = doc.values(&list)[0].0.to_str().unwrap().to_string();
    let expected = if doc.get_actor() > other.get_actor() {
        "left"
    } else {
        "right"
    };
    assert_eq!(winner, expected);
}
