mod common;

use std::time::Duration;

use canopyscan::Compositor;
use canopyscan::geo::resolve_grid;
use common::*;

#[tokio::test(start_paused = true)]
async fn test_tiles_are_fetched_concurrently() -> anyhow::Result<()> {
    let grid = resolve_grid(&bangalore_rect(), 17, 16)?;
    // Sequential fetching would never get past the barrier
    let compositor = Compositor::new(BarrierTileSource::new(grid.len()), 256);

    let image = tokio::time::timeout(Duration::from_secs(30), compositor.composite(&grid)).await??;
    assert_eq!((image.width(), image.height()), (768, 512));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_tile_aborts_remaining_fetches() -> anyhow::Result<()> {
    let grid = resolve_grid(&bangalore_rect(), 17, 16)?;
    let failing = TileAddress {
        x: BANGALORE_TOP_LEFT.x + 1,
        y: BANGALORE_TOP_LEFT.y,
        zoom: 17,
    };
    let compositor = Compositor::new(StallingTileSource::new(failing, grid.len()), 256);

    let result = tokio::time::timeout(Duration::from_secs(30), compositor.composite(&grid)).await?;
    match result {
        Err(PipelineError::TileFetch { tile, reason }) => {
            assert_eq!(tile, failing);
            assert!(reason.contains("500"));
        }
        other => panic!("expected TileFetch, got {other:?}"),
    }

    // Let the runtime drop the aborted tasks
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(compositor.source().abandoned_count(), grid.len() - 1);
    Ok(())
}

#[tokio::test]
async fn test_odd_sized_tiles_are_resized() -> anyhow::Result<()> {
    let grid = resolve_grid(&bangalore_rect(), 17, 16)?;
    let mut source = SolidTileSource::new();
    source.tile_size = 512;
    let compositor = Compositor::new(source, 256);

    let image = compositor.composite(&grid).await?;
    assert_eq!((image.width(), image.height()), (768, 512));
    let last = grid.bottom_right;
    let (px, py) = grid.pixel_offset(last, 256);
    let expected = tile_color(last);
    let pixel = image.pixel(px + 128, py + 128).expect("pixel inside canvas");
    for channel in 0..3 {
        assert!(pixel[channel].abs_diff(expected[channel]) <= 1, "got {pixel:?}");
    }
    Ok(())
}
