use std::net::{IpAddr, Ipv4Addr};

use anyhow::{Context as _, Result};
use futures::TryStreamExt as _;
use rtnetlink::{LinkUnspec, new_connection};

/// Assigns `address`/`netmask` to the named interface and brings it up.
pub async fn assign_device_address(name: &str, address: Ipv4Addr, netmask: Ipv4Addr) -> Result<()> {
    let (connection, handle, _) = new_connection().context("Failed to create netlink connection")?;
    let connection = tokio::spawn(connection);

    let index = handle
        .link()
        .get()
        .match_name(name.to_string())
        .execute()
        .try_next()
        .await
        .with_context(|| format!("Failed to query interface '{name}'"))?
        .with_context(|| format!("No interface named '{name}'"))?
        .header
        .index;

    let prefix_len = u32::from(netmask).count_ones() as u8;

    handle
        .address()
        .add(index, IpAddr::V4(address), prefix_len)
        .execute()
        .await
        .with_context(|| format!("Failed to assign {address}/{prefix_len} to '{name}'"))?;

    handle
        .link()
        .set(LinkUnspec::new_with_index(index).up().build())
        .execute()
        .await
        .with_context(|| format!("Failed to bring up interface '{name}'"))?;

    connection.abort();

    Ok(())
}
