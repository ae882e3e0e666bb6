//! Image upload: pack a raw RGB888 buffer into the device's pixel format
//! and push it either to the live frame buffer or to a flash slot.

use transport::Transport;

use crate::exchange::process;
use crate::flash::{self, WriteCounters};
use crate::{Error, SessionConfig};

/// Flash byte address of the slot 0 image area.
const SLOT0_BASE: u32 = 0x200000;
/// Flash byte address of the slot 1 image area.
const SLOT1_BASE: u32 = 0x280000;
/// Frame buffer freeze applied while chunks are in flight.
const FREEZE_HOLD_MS: u32 = 10_000;

/// Uploads an image.
///
/// `pixels` is a raw RGB888 buffer of `dim_x * dim_y` pixels; decoding and
/// resizing happen upstream. A negative `slot` targets the live frame
/// buffer through `display-plot`, freezing it for the duration and for
/// `timeout_ms` afterwards when positive. Slots 0 and 1 write the packed
/// image to the corresponding flash image area instead.
pub fn image(
    transport: &Transport,
    config: &SessionConfig,
    slot: i32,
    pixels: &[u8],
    dim_x: u32,
    dim_y: u32,
    depth: u32,
    timeout_ms: u32,
) -> Result<(), Error> {
    let packed = pack_pixels(pixels, dim_x, dim_y, depth)?;

    match slot {
        slot if slot < 0 => plot(transport, config, &packed, dim_x, depth, timeout_ms),
        0 | 1 => {
            let base = if slot == 0 { SLOT0_BASE } else { SLOT1_BASE };
            write_image_slot(transport, config, base / config.sector_size as u32, &packed)
        }
        other => Err(Error::hard(format!("invalid image slot {other}"))),
    }
}

fn plot(
    transport: &Transport,
    config: &SessionConfig,
    packed: &[u8],
    dim_x: u32,
    depth: u32,
    timeout_ms: u32,
) -> Result<(), Error> {
    display_freeze(transport, config, FREEZE_HOLD_MS)?;

    for (chunk_index, chunk) in packed.chunks(config.sector_size).enumerate() {
        let byte_offset = chunk_index * config.sector_size;
        let pixel_offset = pixel_index(byte_offset, depth);
        let x = pixel_offset % dim_x;
        let y = pixel_offset / dim_x;

        process(
            transport,
            config,
            &format!("display-plot {pixel_offset} {x} {y}"),
            chunk,
            None,
        )
        .map_err(|error| error.context("display plot"))?;
    }

    display_freeze(transport, config, 0)?;

    if timeout_ms > 0 {
        display_freeze(transport, config, timeout_ms)?;
    }

    Ok(())
}

fn write_image_slot(
    transport: &Transport,
    config: &SessionConfig,
    start_sector: u32,
    packed: &[u8],
) -> Result<(), Error> {
    let mut counters = WriteCounters::default();

    for (index, chunk) in packed.chunks(config.sector_size).enumerate() {
        let mut buffer = chunk.to_vec();
        buffer.resize(config.sector_size, 0);

        flash::write_sector(
            transport,
            config,
            start_sector + index as u32,
            &buffer,
            false,
            &mut counters,
        )?;
    }

    Ok(())
}

fn display_freeze(
    transport: &Transport,
    config: &SessionConfig,
    milliseconds: u32,
) -> Result<(), Error> {
    process(
        transport,
        config,
        &format!("display-freeze {milliseconds}"),
        &[],
        None,
    )
    .map_err(|error| error.context("display freeze"))?;
    Ok(())
}

/// Index of the first pixel stored at `byte_offset` of the packed buffer.
fn pixel_index(byte_offset: usize, depth: u32) -> u32 {
    (byte_offset as u32 * 8) / depth
}

/// Packs RGB888 pixels into the device-endian format for `depth` bits per
/// pixel: 1 bpp is a brightness threshold, MSB first; 16 bpp is RGB565
/// stored big-endian; 24 bpp is 8:8:8.
fn pack_pixels(pixels: &[u8], dim_x: u32, dim_y: u32, depth: u32) -> Result<Vec<u8>, Error> {
    let expected = dim_x as usize * dim_y as usize * 3;
    if pixels.len() != expected {
        return Err(Error::hard(format!(
            "pixel buffer is {} bytes, display {dim_x}x{dim_y} needs {expected}",
            pixels.len()
        )));
    }

    match depth {
        1 => {
            let mut packed = Vec::with_capacity(expected / 3 / 8 + 1);
            let mut accumulator = 0u8;
            let mut bits = 0;

            for pixel in pixels.chunks_exact(3) {
                let luminance = u32::from(pixel[0]) + u32::from(pixel[1]) + u32::from(pixel[2]);
                accumulator <<= 1;
                // (r + g + b) > 1.5 with channels normalised to [0, 1].
                if luminance > 382 {
                    accumulator |= 1;
                }
                bits += 1;

                if bits == 8 {
                    packed.push(accumulator);
                    accumulator = 0;
                    bits = 0;
                }
            }

            if bits > 0 {
                packed.push(accumulator << (8 - bits));
            }

            Ok(packed)
        }
        16 => {
            let mut packed = Vec::with_capacity(expected / 3 * 2);
            for pixel in pixels.chunks_exact(3) {
                let value = (u16::from(pixel[0] >> 3) << 11)
                    | (u16::from(pixel[1] >> 2) << 5)
                    | u16::from(pixel[2] >> 3);
                packed.extend_from_slice(&value.to_be_bytes());
            }
            Ok(packed)
        }
        24 => Ok(pixels.to_vec()),
        other => Err(Error::hard(format!("unsupported display depth {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_one_thresholds_and_packs_msb_first() {
        // Eight pixels: bright, dark, bright, dark, dark, dark, dark, bright.
        let mut pixels = Vec::new();
        for bright in [true, false, true, false, false, false, false, true] {
            let channel = if bright { 0xff } else { 0x20 };
            pixels.extend_from_slice(&[channel; 3]);
        }

        let packed = pack_pixels(&pixels, 8, 1, 1).expect("packs");
        assert_eq!(packed, vec![0b1010_0001]);
    }

    #[test]
    fn depth_one_boundary_sits_at_midpoint() {
        // 128+127+127 = 382: not above the threshold.
        let dark = [128u8, 127, 127];
        // 128+128+127 = 383: above.
        let bright = [128u8, 128, 127];
        let mut pixels = Vec::new();
        pixels.extend_from_slice(&dark);
        pixels.extend_from_slice(&bright);

        let packed = pack_pixels(&pixels, 2, 1, 1).expect("packs");
        assert_eq!(packed, vec![0b0100_0000]);
    }

    #[test]
    fn depth_sixteen_is_rgb565_big_endian() {
        let pixels = [0xff, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0xff];
        let packed = pack_pixels(&pixels, 3, 1, 16).expect("packs");
        assert_eq!(packed, vec![0xf8, 0x00, 0x07, 0xe0, 0x00, 0x1f]);
    }

    #[test]
    fn depth_twentyfour_passes_through() {
        let pixels = [1u8, 2, 3, 4, 5, 6];
        assert_eq!(pack_pixels(&pixels, 2, 1, 24).expect("packs"), pixels);
    }

    #[test]
    fn wrong_buffer_length_is_hard() {
        assert!(pack_pixels(&[0u8; 5], 2, 1, 24).is_err());
    }

    #[test]
    fn unknown_depth_is_hard() {
        assert!(pack_pixels(&[0u8; 6], 2, 1, 8).is_err());
    }

    #[test]
    fn pixel_index_accounts_for_depth() {
        assert_eq!(pixel_index(4096, 1), 32768);
        assert_eq!(pixel_index(4096, 16), 2048);
        assert_eq!(pixel_index(4098, 24), 1366);
    }
}
