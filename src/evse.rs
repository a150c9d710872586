//! The eM4 client: reads outlet metrics and changes the charging current limit.
//!
//! For its methods, "read" means fetching values from the device and "set"
//! means writing a configuration that is then read back to confirm it.

use std::thread;

use log::{debug, info, warn};

use crate::{
    codec::{self, MAX_READ_COUNT},
    config::{ClientConfig, ConnectionTarget},
    error::{Error, ProtocolError, Result},
    model::{self, Metric, MetricReading, RegisterMapEntry},
    register::{check_outlet, DeviceStatus},
    retry::RetryPolicy,
    safety::{self, CurrentLimitBounds},
    transport::{TcpSession, Transport},
};

/// A contiguous range of registers fetched with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadBlock {
    start: u16,
    count: u16,
    /// Indices of the entries served by this block.
    members: Vec<usize>,
}

/// Merge entries into as few contiguous reads as the request size limit allows.
fn plan_reads(entries: &[RegisterMapEntry]) -> Vec<ReadBlock> {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| entries[i].address);

    let mut blocks: Vec<ReadBlock> = Vec::new();
    for i in order {
        let entry = &entries[i];
        match blocks.last_mut() {
            Some(block)
                if block.start as u32 + block.count as u32 == entry.address as u32
                    && block.count + entry.count <= MAX_READ_COUNT =>
            {
                block.count += entry.count;
                block.members.push(i);
            }
            _ => blocks.push(ReadBlock {
                start: entry.address,
                count: entry.count,
                members: vec![i],
            }),
        }
    }
    blocks
}

/// You can create an Em4Client using anything which implements [Transport].
///
/// The client is the only writer of Icmax: every write is validated against
/// limits read from the device immediately before, and confirmed by reading
/// the register back.
pub struct Em4Client<T: Transport = TcpSession> {
    transport: T,
    config: ClientConfig,
    retry: RetryPolicy,
}

impl Em4Client<TcpSession> {
    /// Create a client on a TCP session and connect it to the configured device.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let mut client = Self::new(TcpSession::new(), config);
        client.open()?;
        Ok(client)
    }
}

impl<T: Transport> Em4Client<T> {
    /// Create a new client. Nothing is connected until [Self::open].
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let retry = RetryPolicy::on_timeout(config.retries);
        Self {
            transport,
            config,
            retry,
        }
    }

    /// Replace the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The device this client talks to.
    pub fn target(&self) -> &ConnectionTarget {
        &self.config.device
    }

    pub fn open(&mut self) -> Result<()> {
        self.transport.open(&self.config.device)
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Drop the current connection and connect to `target` instead.
    ///
    /// The client keeps `target` even if connecting fails, so a later
    /// [Self::open] retries the new device rather than the old one.
    pub fn reconnect(&mut self, target: ConnectionTarget) -> Result<()> {
        info!("Switching from {} to {}", self.config.device, target);
        self.config.device = target;
        self.transport.reconnect(&self.config.device)
    }

    /// Read `count` holding registers starting at `start`.
    pub fn read_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let unit_id = self.config.device.unit_id;
        let transport = &mut self.transport;
        self.retry.run("register read", || {
            let frame = codec::encode_read(unit_id, start, count)?;
            let response = transport.exchange(frame.as_bytes())?;
            frame.decode_read_response(&response, count)
        })
    }

    /// Write consecutive holding registers starting at `start`.
    pub fn write_registers(&mut self, start: u16, values: &[u16]) -> Result<()> {
        let unit_id = self.config.device.unit_id;
        let transport = &mut self.transport;
        self.retry.run("register write", || {
            let frame = codec::encode_write(unit_id, start, values)?;
            let response = transport.exchange(frame.as_bytes())?;
            frame.decode_write_response(&response)
        })
    }

    /// Fetch and decode `entries`, returning the readings in the same order.
    ///
    /// Any failed block fails the whole read, partial results are never returned.
    fn read_entries(&mut self, entries: &[RegisterMapEntry]) -> Result<Vec<MetricReading>> {
        let mut words: Vec<Vec<u16>> = vec![Vec::new(); entries.len()];
        for block in plan_reads(entries) {
            debug!("Reading {} registers at 0x{:04X}", block.count, block.start);
            let values = self.read_registers(block.start, block.count)?;
            for &i in &block.members {
                let entry = &entries[i];
                let offset = (entry.address - block.start) as usize;
                words[i] = values[offset..offset + entry.count as usize].to_vec();
            }
        }
        entries
            .iter()
            .zip(words)
            .map(|(entry, raw)| model::decode(entry, &raw))
            .collect()
    }

    /// Read every metric of `outlet`.
    pub fn read_all(&mut self, outlet: u16) -> Result<Vec<MetricReading>> {
        let entries = model::metrics_to_read(outlet)?;
        self.read_entries(&entries)
    }

    /// Read a single metric of `outlet`.
    pub fn read_metric(&mut self, outlet: u16, metric: Metric) -> Result<MetricReading> {
        let entry = metric.entry(outlet)?;
        let raw = self.read_registers(entry.address, entry.count)?;
        model::decode(&entry, &raw)
    }

    pub fn read_status(&mut self, outlet: u16) -> Result<DeviceStatus> {
        let reading = self.read_metric(outlet, Metric::Status)?;
        status_of(&reading)
    }

    /// Read the limits a new Icmax value for `outlet` has to respect.
    pub fn read_bounds(&mut self, outlet: u16) -> Result<CurrentLimitBounds> {
        let (bounds, _) = self.read_write_context(outlet)?;
        Ok(bounds)
    }

    /// Current limits and status of `outlet`, as needed before a write.
    fn read_write_context(&mut self, outlet: u16) -> Result<(CurrentLimitBounds, DeviceStatus)> {
        let entries = [Metric::Status, Metric::IcMax, Metric::IDefault, Metric::IRated]
            .iter()
            .map(|metric| metric.entry(outlet))
            .collect::<Result<Vec<_>>>()?;
        let readings = self.read_entries(&entries)?;

        let status = status_of(&readings[0])?;
        let bounds = CurrentLimitBounds {
            minimum: self.config.limits.minimum,
            installation_limit: quantity_of(&readings[2])?,
            rated: quantity_of(&readings[3])?,
            configured: readings[1].value.as_f64(),
        };
        debug!("Outlet {outlet} bounds: {bounds:?}, status {status}");
        Ok((bounds, status))
    }

    /// Set the maximum charging current of `outlet` in amperes.
    ///
    /// Returns the accepted value once the device has confirmed it. Requests
    /// outside the bounds are rejected before anything is sent.
    pub fn set_icmax(&mut self, outlet: u16, amps: f64) -> Result<f64> {
        check_outlet(outlet)?;
        let (bounds, status) = self.read_write_context(outlet)?;
        let accepted = safety::validate_icmax_request(amps, &bounds).inspect_err(|err| {
            warn!("Icmax {amps} A for outlet {outlet} rejected: {err}");
        })?;
        advise(outlet, status);
        self.apply_icmax(outlet, accepted)?;
        info!("Icmax of outlet {outlet} set to {accepted} A");
        Ok(accepted)
    }

    /// Stop charging on `outlet` by writing an Icmax of 0 A.
    pub fn pause_charging(&mut self, outlet: u16) -> Result<()> {
        check_outlet(outlet)?;
        let status = self.read_status(outlet)?;
        advise(outlet, status);
        self.apply_icmax(outlet, 0.0)?;
        info!("Charging paused on outlet {outlet}");
        Ok(())
    }

    /// Write `amps` to Icmax, wait for the device to apply it and read it back.
    ///
    /// The read-back must hold exactly the register word that was written.
    fn apply_icmax(&mut self, outlet: u16, amps: f64) -> Result<()> {
        let entry = Metric::IcMax.entry(outlet)?;
        let words = model::encode_icmax_write(outlet, amps)?;
        self.write_registers(entry.address, &words)?;

        let delay = self.config.confirm_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let reading = self.read_metric(outlet, Metric::IcMax)?;
        if reading.raw != words {
            let observed = quantity_of(&reading)?;
            warn!("Outlet {outlet} reports Icmax {observed} A after writing {amps} A");
            return Err(Error::WriteNotApplied {
                requested: amps,
                observed,
            });
        }
        Ok(())
    }
}

/// Log what the outlet state means for a pending write. Never blocks the write.
fn advise(outlet: u16, status: DeviceStatus) {
    match status {
        s if s.is_error() => warn!("Outlet {outlet} is in an error state: {s}"),
        s if s.is_blocked() => warn!("Outlet {outlet} is blocked: {s}"),
        DeviceStatus::Booting => warn!("Outlet {outlet} is still booting"),
        DeviceStatus::WaitingForEv => info!(
            "Outlet {outlet} is waiting for an EV, Icmax may read as 0 A until one connects"
        ),
        _ => {}
    }
}

fn status_of(reading: &MetricReading) -> Result<DeviceStatus> {
    reading.value.as_status().ok_or_else(|| mismatch(reading))
}

fn quantity_of(reading: &MetricReading) -> Result<f64> {
    reading.value.as_f64().ok_or_else(|| mismatch(reading))
}

fn mismatch(reading: &MetricReading) -> Error {
    ProtocolError::UnexpectedValue(reading.metric).into()
}
