use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::client::{ClientId, ClientKind, ClientRegistry};
use crate::graph::ConnectionTable;
use crate::port::PortTable;

/// Client A feeds client B iff some output port of A is connected to some
/// input port of B.
fn direct_feeds(
    clients: &ClientRegistry,
    ports: &PortTable,
    connections: &ConnectionTable,
) -> HashMap<ClientId, HashSet<ClientId>> {
    let mut direct: HashMap<ClientId, HashSet<ClientId>> =
        clients.iter().map(|c| (c.id, HashSet::new())).collect();
    for conn in connections.iter() {
        let (Ok(src), Ok(dst)) = (ports.get(conn.source), ports.get(conn.destination)) else {
            continue;
        };
        if let (Some(feeder), Some(fed)) = (
            find_client_by_id(clients, src.owner_client_id),
            find_client_by_id(clients, dst.owner_client_id),
        ) {
            if feeder != fed {
                direct.entry(fed).or_default().insert(feeder);
            }
        }
    }
    direct
}

fn find_client_by_id(clients: &ClientRegistry, raw: u32) -> Option<ClientId> {
    clients.iter().find(|c| c.id.slot == raw).map(|c| c.id)
}

/// `jack_trace_terminal`: transitive closure of the direct-feeds relation.
/// The cycle safeguard (skip nodes already in the root's accumulated set)
/// both guarantees termination and implicitly leaves feedback loops
/// broken rather than infinitely recursed.
fn trace_fed_by(root: ClientId, direct: &HashMap<ClientId, HashSet<ClientId>>) -> HashSet<ClientId> {
    let mut fed_by = HashSet::new();
    let mut stack: Vec<ClientId> = direct.get(&root).cloned().unwrap_or_default().into_iter().collect();
    while let Some(c) = stack.pop() {
        if fed_by.contains(&c) {
            continue;
        }
        fed_by.insert(c);
        if let Some(next) = direct.get(&c) {
            for &n in next {
                if !fed_by.contains(&n) {
                    stack.push(n);
                }
            }
        }
    }
    fed_by
}

/// Rebuild every active client's `fed_by` set from the current connection
/// table. Called on every structural mutation.
pub fn recompute_fed_by(
    clients: &mut ClientRegistry,
    ports: &PortTable,
    connections: &ConnectionTable,
) {
    let direct = direct_feeds(clients, ports, connections);
    let ids: Vec<ClientId> = clients.ids();
    let computed: HashMap<ClientId, HashSet<ClientId>> = ids
        .iter()
        .map(|&id| (id, trace_fed_by(id, &direct)))
        .collect();
    for id in ids {
        if let Some(c) = clients.get_mut(id) {
            c.fed_by = computed.remove(&id).unwrap_or_default();
        }
    }
}

/// A < B iff A feeds B and B does not feed A. When both feed each other
/// (a feedback loop), the driver client wins the earlier slot; otherwise
/// they compare equal and a stable sort preserves relative order, with
/// `ClientId` as the explicit secondary key for determinism.
fn compare(a: &crate::client::Client, b: &crate::client::Client, driver_id: Option<ClientId>) -> Ordering {
    let a_feeds_b = b.fed_by.contains(&a.id);
    let b_feeds_a = a.fed_by.contains(&b.id);
    match (a_feeds_b, b_feeds_a) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => {
            // Feedback loop: driver wins the earlier slot.
            if Some(a.id) == driver_id {
                Ordering::Less
            } else if Some(b.id) == driver_id {
                Ordering::Greater
            } else {
                a.id.cmp(&b.id)
            }
        }
        (false, false) => a.id.cmp(&b.id).then(Ordering::Equal),
    }
}

/// Stable topological sort of all active clients. If a cycle exists it is
/// broken by privileging the driver client (see [`compare`]).
pub fn topo_sort(clients: &ClientRegistry, driver_id: Option<ClientId>) -> Vec<ClientId> {
    let mut active: Vec<&crate::client::Client> =
        clients.iter().filter(|c| c.active && !c.dead).collect();
    active.sort_by(|a, b| compare(a, b, driver_id));
    active.into_iter().map(|c| c.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientKind;
    use crate::port::PortTable;
    use engine_proto::{PortFlags, PortTypeId};

    fn mk_client(reg: &mut ClientRegistry, name: &str) -> ClientId {
        let id = reg.register(name.into(), ClientKind::InProcess).unwrap();
        reg.get_mut(id).unwrap().active = true;
        id
    }

    #[test]
    fn linear_chain_sorts_in_feed_order() {
        let mut reg = ClientRegistry::new();
        let mut ports = PortTable::new(16);
        let mut conns = ConnectionTable::new();

        let x = mk_client(&mut reg, "x");
        let y = mk_client(&mut reg, "y");
        let z = mk_client(&mut reg, "z");

        let x_out = ports
            .register(PortTypeId::AUDIO, x.slot, "x:out".into(), PortFlags::OUTPUT)
            .unwrap();
        let y_in = ports
            .register(PortTypeId::AUDIO, y.slot, "y:in".into(), PortFlags::INPUT)
            .unwrap();
        let y_out = ports
            .register(PortTypeId::AUDIO, y.slot, "y:out".into(), PortFlags::OUTPUT)
            .unwrap();
        let z_in = ports
            .register(PortTypeId::AUDIO, z.slot, "z:in".into(), PortFlags::INPUT)
            .unwrap();

        conns.add(x_out, y_in);
        conns.add(y_out, z_in);

        recompute_fed_by(&mut reg, &ports, &conns);
        let sorted = topo_sort(&reg, None);
        assert_eq!(sorted, vec![x, y, z]);
    }

    #[test]
    fn feedback_loop_places_driver_first() {
        let mut reg = ClientRegistry::new();
        let mut ports = PortTable::new(16);
        let mut conns = ConnectionTable::new();

        let d = reg.register("driver".into(), ClientKind::Driver).unwrap();
        reg.get_mut(d).unwrap().active = true;
        let e = mk_client(&mut reg, "e");

        let d_out = ports
            .register(PortTypeId::AUDIO, d.slot, "d:out".into(), PortFlags::OUTPUT)
            .unwrap();
        let e_in = ports
            .register(PortTypeId::AUDIO, e.slot, "e:in".into(), PortFlags::INPUT)
            .unwrap();
        let e_out = ports
            .register(PortTypeId::AUDIO, e.slot, "e:out".into(), PortFlags::OUTPUT)
            .unwrap();
        let d_in = ports
            .register(PortTypeId::AUDIO, d.slot, "d:in".into(), PortFlags::INPUT)
            .unwrap();

        conns.add(d_out, e_in);
        conns.add(e_out, d_in);

        recompute_fed_by(&mut reg, &ports, &conns);
        assert!(reg.get(d).unwrap().fed_by.contains(&e));
        assert!(reg.get(e).unwrap().fed_by.contains(&d));

        let sorted = topo_sort(&reg, Some(d));
        assert_eq!(sorted, vec![d, e]);
    }
}
