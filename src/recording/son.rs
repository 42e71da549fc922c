//! Minimal reader for the 32-bit CED SON filing system (`.smr`).
//!
//! Only what the pipeline needs is decoded: the file header, the channel
//! table, and the data-block chain of the first waveform channel (Adc or
//! RealWave). Event, marker and text channels are skipped.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

use super::RecordingError;

/// Size of the fixed file header.
const FILE_HEADER_SIZE: u64 = 512;
/// Size of one channel header.
const CHANNEL_HEADER_SIZE: u64 = 140;
/// Size of one data-block header preceding the samples.
const BLOCK_HEADER_SIZE: usize = 20;

/// ADC counts per unit, fixed by the SON specification.
const ADC_COUNTS_PER_UNIT: f64 = 6553.6;

/// Channel kinds we can pull a waveform out of.
const KIND_ADC: u8 = 1;
const KIND_REAL_WAVE: u8 = 9;

/// A decoded waveform channel.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f64>,
    pub sample_rate: f64,
    pub title: String,
}

struct FileHead {
    system_id: i16,
    us_per_time: i16,
    time_per_adc: i16,
    channels: i16,
    dtime_base: f64,
}

struct ChannelHead {
    first_block: i32,
    blocks: i16,
    l_chan_dvd: i32,
    title: String,
    kind: u8,
    scale: f32,
    offset: f32,
    divide: i16,
}

/// Read the first waveform channel of a SON container.
pub fn read_waveform<R: Read + Seek>(reader: &mut R) -> Result<Waveform, RecordingError> {
    let head = read_file_head(reader)?;

    for chan in 0..head.channels {
        let channel = read_channel_head(reader, chan)?;
        if channel.kind != KIND_ADC && channel.kind != KIND_REAL_WAVE {
            continue;
        }

        let interval = sample_interval(&head, &channel);
        if !(interval > 0.0) {
            return Err(RecordingError::BadTiming(channel.title));
        }

        let samples = read_block_chain(reader, &channel)?;
        return Ok(Waveform {
            samples,
            sample_rate: 1.0 / interval,
            title: channel.title,
        });
    }

    Err(RecordingError::NoWaveformChannel)
}

fn read_file_head<R: Read + Seek>(reader: &mut R) -> Result<FileHead, RecordingError> {
    reader.seek(SeekFrom::Start(0))?;

    let system_id = reader.read_i16::<LittleEndian>()?;
    let mut copyright = [0u8; 10];
    reader.read_exact(&mut copyright)?;
    let mut creator = [0u8; 8];
    reader.read_exact(&mut creator)?;
    let us_per_time = reader.read_i16::<LittleEndian>()?;
    let time_per_adc = reader.read_i16::<LittleEndian>()?;
    let _file_state = reader.read_i16::<LittleEndian>()?;
    let _first_data = reader.read_i32::<LittleEndian>()?;
    let channels = reader.read_i16::<LittleEndian>()?;
    let chan_size = reader.read_i16::<LittleEndian>()?;
    let _extra_data = reader.read_i16::<LittleEndian>()?;
    let _buffer_size = reader.read_i16::<LittleEndian>()?;
    let _os_format = reader.read_i16::<LittleEndian>()?;
    let _max_ftime = reader.read_i32::<LittleEndian>()?;
    let mut dtime_base = reader.read_f64::<LittleEndian>()?;

    // SON revisions predating the time base field leave it zeroed.
    if dtime_base <= 0.0 {
        dtime_base = 1e-6;
    }

    if !(0..=15).contains(&system_id) || chan_size as u64 != CHANNEL_HEADER_SIZE {
        return Err(RecordingError::UnrecognizedFormat(format!(
            "system id {system_id}, channel header size {chan_size}"
        )));
    }
    if !(1..=451).contains(&channels) {
        return Err(RecordingError::UnrecognizedFormat(format!(
            "implausible channel count {channels}"
        )));
    }

    Ok(FileHead {
        system_id,
        us_per_time,
        time_per_adc,
        channels,
        dtime_base,
    })
}

fn read_channel_head<R: Read + Seek>(
    reader: &mut R,
    chan: i16,
) -> Result<ChannelHead, RecordingError> {
    let base = FILE_HEADER_SIZE + chan as u64 * CHANNEL_HEADER_SIZE;
    reader.seek(SeekFrom::Start(base))?;

    let _del_size = reader.read_i16::<LittleEndian>()?;
    let _next_del_block = reader.read_i32::<LittleEndian>()?;
    let first_block = reader.read_i32::<LittleEndian>()?;
    let _last_block = reader.read_i32::<LittleEndian>()?;
    let blocks = reader.read_i16::<LittleEndian>()?;
    let _n_extra = reader.read_i16::<LittleEndian>()?;
    let _pre_trig = reader.read_i16::<LittleEndian>()?;
    let _free0 = reader.read_i16::<LittleEndian>()?;
    let _phy_sz = reader.read_i16::<LittleEndian>()?;
    let _max_data = reader.read_i16::<LittleEndian>()?;

    // Pascal-style comment string, 72 bytes, not needed.
    reader.seek(SeekFrom::Start(base + 98))?;
    let _max_chan_time = reader.read_i32::<LittleEndian>()?;
    let l_chan_dvd = reader.read_i32::<LittleEndian>()?;
    let _phy_chan = reader.read_i16::<LittleEndian>()?;

    let mut title_buf = [0u8; 10];
    reader.read_exact(&mut title_buf)?;
    let title_len = (title_buf[0] as usize).min(9);
    let title = String::from_utf8_lossy(&title_buf[1..1 + title_len])
        .trim()
        .to_string();

    let _ideal_rate = reader.read_f32::<LittleEndian>()?;
    let kind = reader.read_u8()?;
    let _pad = reader.read_u8()?;

    // Waveform channels carry scaling and timing extras.
    let (scale, offset, divide) = if kind == KIND_ADC || kind == KIND_REAL_WAVE {
        let scale = reader.read_f32::<LittleEndian>()?;
        let offset = reader.read_f32::<LittleEndian>()?;
        let mut units = [0u8; 6];
        reader.read_exact(&mut units)?;
        let divide = reader.read_i16::<LittleEndian>()?;
        (scale, offset, divide)
    } else {
        (1.0, 0.0, 1)
    };

    Ok(ChannelHead {
        first_block,
        blocks,
        l_chan_dvd,
        title,
        kind,
        scale,
        offset,
        divide,
    })
}

/// Sample interval in seconds. Old SON revisions derive waveform timing from
/// the ADC clock, newer ones from the file time base.
fn sample_interval(head: &FileHead, channel: &ChannelHead) -> f64 {
    if head.system_id < 6 {
        channel.divide as f64 * head.us_per_time as f64 * head.time_per_adc as f64 * 1e-6
    } else {
        channel.l_chan_dvd as f64 * head.us_per_time as f64 * head.dtime_base
    }
}

fn read_block_chain<R: Read + Seek>(
    reader: &mut R,
    channel: &ChannelHead,
) -> Result<Vec<f64>, RecordingError> {
    if channel.first_block <= 0 {
        return Err(RecordingError::NoData(channel.title.clone()));
    }

    let mut samples = Vec::new();
    let mut offset = channel.first_block as i64;
    let mut visited: usize = 0;
    // The header's block count bounds the chain; a longer chain is corrupt.
    let max_blocks = channel.blocks.max(1) as usize;

    while offset > 0 {
        if visited >= max_blocks {
            return Err(RecordingError::BadBlockChain {
                title: channel.title.clone(),
                offset,
            });
        }
        visited += 1;

        reader.seek(SeekFrom::Start(offset as u64))?;
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let succ_block = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let items = i16::from_le_bytes([header[18], header[19]]);
        if items < 0 {
            return Err(RecordingError::BadBlockChain {
                title: channel.title.clone(),
                offset,
            });
        }

        match channel.kind {
            KIND_ADC => {
                for _ in 0..items {
                    let raw = reader.read_i16::<LittleEndian>()?;
                    samples.push(
                        raw as f64 * channel.scale as f64 / ADC_COUNTS_PER_UNIT
                            + channel.offset as f64,
                    );
                }
            }
            _ => {
                for _ in 0..items {
                    samples.push(reader.read_f32::<LittleEndian>()? as f64);
                }
            }
        }

        offset = succ_block as i64;
    }

    if samples.is_empty() {
        return Err(RecordingError::NoData(channel.title.clone()));
    }

    Ok(samples)
}
