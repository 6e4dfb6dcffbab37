//! Sample rate and channel layout conversion

/// Resample planar audio with linear interpolation
///
/// Returns the input unchanged when the rates match.
pub fn linear(planar: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Vec<Vec<f32>> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return planar.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    planar
        .iter()
        .map(|channel| {
            if channel.is_empty() {
                return Vec::new();
            }
            let last = channel.len() - 1;
            let output_frames = (channel.len() as f64 * ratio).round() as usize;

            (0..output_frames)
                .map(|frame| {
                    let position = frame as f64 / ratio;
                    let index = (position as usize).min(last);
                    let fraction = (position - index as f64) as f32;
                    let next = (index + 1).min(last);
                    channel[index] * (1.0 - fraction) + channel[next] * fraction
                })
                .collect()
        })
        .collect()
}

/// Map planar audio onto `channels` output channels
///
/// Mono is duplicated to every output; other layouts keep matching channels,
/// repeat the last one when short and drop the excess when long.
pub fn remap_channels(planar: Vec<Vec<f32>>, channels: usize) -> Vec<Vec<f32>> {
    if planar.len() == channels || planar.is_empty() {
        return planar;
    }
    let last = planar.len() - 1;
    (0..channels).map(|c| planar[c.min(last)].clone()).collect()
}

/// Interleave `frames` frames of planar audio starting at `offset`
pub fn interleave(planar: &[Vec<f32>], offset: usize, frames: usize, out: &mut Vec<f32>) {
    out.reserve(frames * planar.len());
    for frame in offset..offset + frames {
        for channel in planar {
            out.push(channel.get(frame).copied().unwrap_or(0.0));
        }
    }
}
